use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::language::Language;
use crate::protocol::endpoint::{handle_translate, TranslateResponse};
use crate::services::provider::Translator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointReply {
    pub translated_text: String,
    pub passthrough: bool,
}

/// Whatever answers `{ text, targetLang }` requests for the runtime cache.
pub trait TranslationEndpoint: Send + Sync {
    fn translate(&self, text: &str, target: Language) -> Result<EndpointReply>;
}

/// Calls the endpoint handler in-process.
pub struct LocalEndpoint<T> {
    translator: T,
}

impl<T: Translator> LocalEndpoint<T> {
    pub fn new(translator: T) -> Self {
        Self { translator }
    }
}

impl<T: Translator> TranslationEndpoint for LocalEndpoint<T> {
    fn translate(&self, text: &str, target: Language) -> Result<EndpointReply> {
        let body = json!({ "text": text, "targetLang": target.code() });
        let resp = handle_translate(&body, &self.translator);
        reply_from(resp.status, resp.body)
    }
}

/// Posts JSON to a remote endpoint URL.
pub struct HttpEndpoint {
    client: Client,
    url: String,
}

impl HttpEndpoint {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::Config("endpoint url must not be empty".into()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self { client, url })
    }
}

impl TranslationEndpoint for HttpEndpoint {
    fn translate(&self, text: &str, target: Language) -> Result<EndpointReply> {
        let resp = self
            .client
            .post(&self.url)
            .json(&json!({ "text": text, "targetLang": target.code() }))
            .send()
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let body: Value = resp.json().unwrap_or(Value::Null);
        reply_from(status, body)
    }
}

fn reply_from(status: u16, body: Value) -> Result<EndpointReply> {
    if !(200..300).contains(&status) {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("translation endpoint error")
            .to_string();
        return Err(if status == 400 {
            Error::InvalidRequest(message)
        } else {
            Error::ProviderFailure {
                status: Some(status),
                message,
            }
        });
    }

    let resp: TranslateResponse = serde_json::from_value(body)?;
    Ok(EndpointReply {
        translated_text: resp.translated_text,
        passthrough: resp.passthrough,
    })
}
