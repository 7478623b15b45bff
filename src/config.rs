use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::language::{Language, LanguageContext};
use crate::parsers::markdown::{default_transliterations, MarkdownCodec, TokenStyle, VariantSet};
use crate::services::batch::BatchConfig;
use crate::services::images::{RelocationConfig, DEFAULT_TRANSIENT_PATTERN};
use crate::services::provider::{ProviderConfig, RetryPolicy, DEFAULT_ENDPOINT};

pub const DEFAULT_CONFIG_FILE: &str = "lingo.toml";

const ENV_FILES: [&str; 2] = [".env.local", ".env"];

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderSection,
    pub languages: LanguagesSection,
    pub batch: BatchSection,
    pub images: ImagesSection,
    pub codec: CodecSection,
    pub cache: CacheSection,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderSection {
    pub endpoint: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub source_lang: Option<Language>,
    /// Defaults to on for the `tag` marker style.
    pub tag_handling: Option<bool>,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key_env: "DEEPL_API_KEY".to_string(),
            api_key: None,
            source_lang: None,
            tag_handling: None,
            timeout_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 800,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LanguagesSection {
    pub source: Language,
    /// Every non-source language when empty.
    pub targets: Vec<Language>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatchSection {
    pub content_dir: PathBuf,
    pub store_path: PathBuf,
    pub public_path: Option<PathBuf>,
    pub request_delay_ms: u64,
    pub allow_unresolved_tokens: bool,
    /// Refuse to run instead of writing untranslated copies when no API key
    /// is configured.
    pub require_credential: bool,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("content/posts"),
            store_path: PathBuf::from("content/translations/translations.json"),
            public_path: Some(PathBuf::from("public/content/translations/translations.json")),
            request_delay_ms: 1000,
            allow_unresolved_tokens: false,
            require_credential: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ImagesSection {
    pub enabled: bool,
    pub dir: PathBuf,
    pub url_prefix: String,
    pub transient_pattern: String,
    pub timeout_secs: u64,
}

impl Default for ImagesSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("public/images/posts"),
            url_prefix: "/images/posts".to_string(),
            transient_pattern: DEFAULT_TRANSIENT_PATTERN.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CodecSection {
    pub style: TokenStyle,
    pub transliterations: Vec<String>,
}

impl Default for CodecSection {
    fn default() -> Self {
        Self {
            style: TokenStyle::default(),
            transliterations: default_transliterations(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSection {
    pub dir: PathBuf,
    /// Remote endpoint for the runtime cache; in-process when unset.
    pub endpoint_url: Option<String>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cache/lingo"),
            endpoint_url: None,
        }
    }
}

/// Loads `.env.local` / `.env`, then the TOML file. With no explicit path a
/// missing `lingo.toml` just means defaults.
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    load_dotenv();

    let mut cfg = match path {
        Some(p) => parse_file(p)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => parse_file(Path::new(DEFAULT_CONFIG_FILE))?,
        None => {
            debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
            AppConfig::default()
        }
    };

    cfg.provider.api_key = env::var(&cfg.provider.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty());

    if cfg.provider.api_key.is_none() {
        warn!(var = %cfg.provider.api_key_env, "translation API key not set; translation will pass text through");
    }

    Ok(cfg)
}

pub fn parse_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    parse_str(&content).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

pub fn parse_str(content: &str) -> Result<AppConfig> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
}

fn load_dotenv() {
    for file in ENV_FILES {
        if !Path::new(file).exists() {
            continue;
        }
        match dotenv::from_filename(file) {
            Ok(_) => info!("loaded environment from {file}"),
            Err(e) => warn!("failed to load {file}: {e}"),
        }
    }
}

impl AppConfig {
    pub fn language_context(&self) -> LanguageContext {
        LanguageContext::source_only(self.languages.source)
    }

    pub fn target_languages(&self) -> Vec<Language> {
        let source = self.languages.source;
        if self.languages.targets.is_empty() {
            return self.language_context().targets();
        }

        let mut targets = Vec::new();
        for lang in &self.languages.targets {
            if *lang != source && !targets.contains(lang) {
                targets.push(*lang);
            }
        }
        targets
    }

    pub fn provider_config(&self) -> ProviderConfig {
        let p = &self.provider;
        ProviderConfig {
            endpoint: p.endpoint.clone(),
            api_key: p.api_key.clone(),
            source_lang: p.source_lang,
            tag_handling: p
                .tag_handling
                .unwrap_or(self.codec.style == TokenStyle::Tag),
            timeout: Duration::from_secs(p.timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.provider.max_retries.max(1),
            base_delay: Duration::from_millis(self.provider.retry_base_delay_ms),
        }
    }

    pub fn codec(&self) -> MarkdownCodec {
        let style = self.codec.style;
        MarkdownCodec::new(style, VariantSet::defaults(style, &self.codec.transliterations))
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            source: self.languages.source,
            targets: self.target_languages(),
            store_path: self.batch.store_path.clone(),
            public_path: self.batch.public_path.clone(),
            request_delay: Duration::from_millis(self.batch.request_delay_ms),
            allow_unresolved_tokens: self.batch.allow_unresolved_tokens,
        }
    }

    pub fn relocation_config(&self) -> Result<RelocationConfig> {
        let transient = Regex::new(&self.images.transient_pattern)
            .map_err(|e| Error::Config(format!("images.transient_pattern: {e}")))?;
        Ok(RelocationConfig {
            dir: self.images.dir.clone(),
            url_prefix: self.images.url_prefix.clone(),
            transient,
        })
    }

    pub fn ensure_credential(&self) -> Result<()> {
        if self.batch.require_credential && self.provider.api_key.is_none() {
            return Err(Error::ConfigurationAbsent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_str("").unwrap();
        assert_eq!(cfg.languages.source, Language::Ko);
        assert_eq!(cfg.target_languages(), vec![Language::En, Language::Ja]);
        assert_eq!(cfg.batch.request_delay_ms, 1000);
        assert_eq!(cfg.provider.api_key_env, "DEEPL_API_KEY");
        assert_eq!(cfg.codec.style, TokenStyle::Text);
        assert!(!cfg.provider_config().tag_handling);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = parse_str(
            r#"
            [languages]
            source = "en"
            targets = ["ja", "en"]

            [codec]
            style = "tag"

            [batch]
            request_delay_ms = 0
            allow_unresolved_tokens = true
            "#,
        )
        .unwrap();

        assert_eq!(cfg.target_languages(), vec![Language::Ja]);
        assert!(cfg.provider_config().tag_handling);
        assert_eq!(cfg.codec().style(), TokenStyle::Tag);

        let batch = cfg.batch_config();
        assert_eq!(batch.source, Language::En);
        assert!(batch.request_delay.is_zero());
        assert!(batch.allow_unresolved_tokens);
    }

    #[test]
    fn unknown_language_is_a_config_error() {
        let err = parse_str("[languages]\nsource = \"zh\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn bad_transient_pattern_is_reported() {
        let cfg = parse_str("[images]\ntransient_pattern = \"(\"").unwrap();
        assert!(cfg.relocation_config().is_err());
    }

    #[test]
    fn strict_batch_requires_a_key() {
        let mut cfg = parse_str("[batch]\nrequire_credential = true").unwrap();
        assert!(matches!(cfg.ensure_credential(), Err(Error::ConfigurationAbsent)));
        cfg.provider.api_key = Some("k".into());
        assert!(cfg.ensure_credential().is_ok());
    }
}
