use rand::{thread_rng, Rng};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{thread, time::Duration};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::language::Language;

pub const DEFAULT_ENDPOINT: &str = "https://api-free.deepl.com/v2/translate";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Anything that turns `text` into `target`-language text.
pub trait Translator: Send + Sync {
    fn translate(&self, text: &str, target: Language) -> Result<String>;

    /// `false` when calls are answered by returning the input unchanged.
    fn is_configured(&self) -> bool {
        true
    }
}

impl<T: Translator + ?Sized> Translator for &T {
    fn translate(&self, text: &str, target: Language) -> Result<String> {
        (**self).translate(text, target)
    }

    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }
}

impl<T: Translator + ?Sized> Translator for Arc<T> {
    fn translate(&self, text: &str, target: Language) -> Result<String> {
        (**self).translate(text, target)
    }

    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }
}

impl<T: Translator + ?Sized> Translator for Box<T> {
    fn translate(&self, text: &str, target: Language) -> Result<String> {
        (**self).translate(text, target)
    }

    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub source_lang: Option<Language>,
    pub tag_handling: bool,
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            source_lang: None,
            tag_handling: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    translations: Vec<ProviderTranslation>,
}

#[derive(Debug, Deserialize)]
struct ProviderTranslation {
    text: String,
}

/// DeepL-compatible `/v2/translate` client.
pub struct DeepLClient {
    client: Client,
    cfg: ProviderConfig,
    warned_missing_key: AtomicBool,
}

impl DeepLClient {
    pub fn new(cfg: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            client,
            cfg,
            warned_missing_key: AtomicBool::new(false),
        })
    }

    fn api_key(&self) -> Option<&str> {
        self.cfg
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub(crate) fn form_params(&self, text: &str, target: Language) -> Vec<(&'static str, String)> {
        build_form(&self.cfg, text, target)
    }
}

impl Translator for DeepLClient {
    fn translate(&self, text: &str, target: Language) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::InvalidRequest("text must not be empty".into()));
        }

        let Some(api_key) = self.api_key() else {
            if !self.warned_missing_key.swap(true, Ordering::Relaxed) {
                warn!("translation API key is not set; returning original text");
            }
            return Ok(text.to_string());
        };

        debug!(target_lang = target.code(), chars = text.chars().count(), "provider request");

        let resp = self
            .client
            .post(&self.cfg.endpoint)
            .header("Authorization", format!("DeepL-Auth-Key {api_key}"))
            .form(&self.form_params(text, target))
            .send()
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = resp.status();

        // Read as text first so an error body is not lost when it is not JSON.
        let body = resp.text().map_err(|e| Error::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::ProviderFailure {
                status: Some(status.as_u16()),
                message: extract_error_message(status, &body),
            });
        }

        parse_response(&body)
    }

    fn is_configured(&self) -> bool {
        self.api_key().is_some()
    }
}

fn build_form(cfg: &ProviderConfig, text: &str, target: Language) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("text", text.to_string()),
        ("target_lang", target.provider_code().to_string()),
        ("preserve_formatting", "1".to_string()),
    ];

    if let Some(source) = cfg.source_lang {
        params.push(("source_lang", source.provider_code().to_string()));
    }

    if cfg.tag_handling {
        params.push(("tag_handling", "xml".to_string()));
    }

    params
}

fn parse_response(body: &str) -> Result<String> {
    let parsed: ProviderResponse = serde_json::from_str(body).map_err(|_| Error::ProviderFailure {
        status: None,
        message: "invalid JSON from provider".into(),
    })?;

    parsed
        .translations
        .into_iter()
        .next()
        .map(|t| t.text)
        .ok_or_else(|| Error::ProviderFailure {
            status: None,
            message: "provider response has no translations".into(),
        })
}

fn extract_error_message(status: StatusCode, body_text: &str) -> String {
    // { "message": "..." } is what DeepL sends; keep the nested shape too.
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body_text) {
        if let Some(msg) = v.get("message").and_then(|m| m.as_str()) {
            return format!("HTTP {}: {}", status.as_u16(), msg);
        }
        if let Some(msg) = v
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return format!("HTTP {}: {}", status.as_u16(), msg);
        }
    }

    let reason = status.canonical_reason().unwrap_or("unknown status");
    let trimmed = body_text.trim();
    if trimmed.is_empty() {
        return format!("HTTP {}: {}", status.as_u16(), reason);
    }

    let snippet: String = trimmed.chars().take(400).collect();
    format!("HTTP {} {}: {}", status.as_u16(), reason, snippet)
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(800),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let jitter: u64 = thread_rng().gen_range(0..200);
        let factor = 2_u32.saturating_pow(attempt as u32);
        self.base_delay.saturating_mul(factor) + Duration::from_millis(jitter)
    }
}

/// Caller-side retry around another translator. Only transient failures are
/// retried; everything else is returned on the first attempt.
pub struct RetryingTranslator<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Translator> RetryingTranslator<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<T: Translator> Translator for RetryingTranslator<T> {
    fn translate(&self, text: &str, target: Language) -> Result<String> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.inner.translate(text, target) {
                Ok(out) => return Ok(out),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    warn!(attempt = attempt + 1, "transient provider failure, retrying: {e}");
                    thread::sleep(self.policy.backoff(attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn unconfigured() -> DeepLClient {
        DeepLClient::new(ProviderConfig::default()).unwrap()
    }

    #[test]
    fn passes_through_without_api_key() {
        let client = unconfigured();
        assert!(!client.is_configured());
        for lang in [Language::En, Language::Ja, Language::Ko] {
            assert_eq!(client.translate("안녕하세요", lang).unwrap(), "안녕하세요");
        }
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let client = DeepLClient::new(ProviderConfig {
            api_key: Some("   ".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(!client.is_configured());
    }

    #[test]
    fn empty_text_is_rejected() {
        let err = unconfigured().translate("  ", Language::En).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn form_requests_formatting_preservation() {
        let cfg = ProviderConfig {
            source_lang: Some(Language::Ko),
            tag_handling: true,
            ..Default::default()
        };
        let params = build_form(&cfg, "본문", Language::Ja);
        assert!(params.contains(&("target_lang", "JA".to_string())));
        assert!(params.contains(&("source_lang", "KO".to_string())));
        assert!(params.contains(&("preserve_formatting", "1".to_string())));
        assert!(params.contains(&("tag_handling", "xml".to_string())));

        let plain = build_form(&ProviderConfig::default(), "본문", Language::En);
        assert!(!plain.iter().any(|(k, _)| *k == "tag_handling"));
    }

    #[test]
    fn parses_first_translation() {
        let body = r#"{"translations":[{"detected_source_language":"KO","text":"Hello"}]}"#;
        assert_eq!(parse_response(body).unwrap(), "Hello");
        assert!(parse_response(r#"{"translations":[]}"#).is_err());
        assert!(parse_response("<html>").is_err());
    }

    #[test]
    fn error_message_prefers_provider_message() {
        let msg = extract_error_message(StatusCode::FORBIDDEN, r#"{"message":"Wrong auth key"}"#);
        assert_eq!(msg, "HTTP 403: Wrong auth key");

        let msg = extract_error_message(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(msg, "HTTP 500: Internal Server Error");
    }

    struct Flaky {
        calls: AtomicUsize,
        fail_first: usize,
        status: u16,
    }

    impl Translator for Flaky {
        fn translate(&self, text: &str, _target: Language) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(Error::ProviderFailure {
                    status: Some(self.status),
                    message: "boom".into(),
                });
            }
            Ok(text.to_uppercase())
        }
    }

    #[test]
    fn retries_transient_failures_only() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        };

        let flaky = Flaky { calls: AtomicUsize::new(0), fail_first: 2, status: 503 };
        let retrying = RetryingTranslator::new(&flaky, policy);
        assert_eq!(retrying.translate("hi", Language::En).unwrap(), "HI");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);

        let denied = Flaky { calls: AtomicUsize::new(0), fail_first: 5, status: 403 };
        let retrying = RetryingTranslator::new(&denied, policy);
        assert!(retrying.translate("hi", Language::En).is_err());
        assert_eq!(denied.calls.load(Ordering::SeqCst), 1);
    }
}
