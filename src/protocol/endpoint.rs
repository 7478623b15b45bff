//! The translation endpoint as a pure request/response function. A host web
//! framework only forwards the JSON body in and the status + body out.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::error::Error;
use crate::model::language::Language;
use crate::services::provider::Translator;

pub const MISSING_FIELDS: &str = "Text and targetLang are required";
pub const INVALID_LANGUAGE: &str = "Invalid target language";
pub const TRANSLATION_FAILED: &str = "Translation failed";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TranslateResponse {
    pub translated_text: String,
    /// Set when no provider credential is configured and the text came back
    /// untranslated.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub passthrough: bool,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct EndpointResponse {
    pub status: u16,
    pub body: Value,
}

impl EndpointResponse {
    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }),
        }
    }

    fn ok(resp: TranslateResponse) -> Self {
        Self {
            status: 200,
            body: serde_json::to_value(resp).unwrap_or_else(|_| json!({})),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Same as [`handle_translate`] for a raw, not yet parsed request body.
pub fn handle_translate_raw(raw: &str, translator: &dyn Translator) -> EndpointResponse {
    match serde_json::from_str::<Value>(raw) {
        Ok(body) => handle_translate(&body, translator),
        Err(_) => EndpointResponse::error(400, MISSING_FIELDS),
    }
}

pub fn handle_translate(body: &Value, translator: &dyn Translator) -> EndpointResponse {
    let req: TranslateRequest = serde_json::from_value(body.clone()).unwrap_or_default();

    let (Some(text), Some(target)) = (
        req.text.filter(|t| !t.is_empty()),
        req.target_lang.filter(|l| !l.is_empty()),
    ) else {
        return EndpointResponse::error(400, MISSING_FIELDS);
    };

    let Ok(target) = target.parse::<Language>() else {
        return EndpointResponse::error(400, INVALID_LANGUAGE);
    };

    if !translator.is_configured() {
        warn!("translation API key is not set; translation skipped");
        return EndpointResponse::ok(TranslateResponse {
            translated_text: text,
            passthrough: true,
        });
    }

    match translator.translate(&text, target) {
        Ok(translated_text) => EndpointResponse::ok(TranslateResponse {
            translated_text,
            passthrough: false,
        }),
        Err(Error::InvalidRequest(msg)) => EndpointResponse::error(400, &msg),
        Err(e) => {
            error!("translation error: {e}");
            EndpointResponse::error(500, TRANSLATION_FAILED)
        }
    }
}
