use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::model::document::Document;
use crate::model::language::{Language, LanguageContext};
use crate::parsers::markdown::{MarkdownCodec, TokenTable};
use crate::services::batch::{BatchJob, BatchReport};
use crate::services::content::DirectorySource;
use crate::services::document::DocumentTranslator;
use crate::services::images::{HttpImageFetcher, ImageRelocator};
use crate::services::provider::{DeepLClient, RetryingTranslator, Translator};
use crate::services::runtime_cache::endpoint::{HttpEndpoint, LocalEndpoint, TranslationEndpoint};
use crate::services::runtime_cache::storage::FileStorage;
use crate::services::runtime_cache::RuntimeCache;
use crate::services::translation_store;

pub mod endpoint;

mod command;
use command::Command;

fn get_cmd(req: &Value) -> &str {
    req.get("cmd").and_then(|v| v.as_str()).unwrap_or("")
}

fn get_id(req: &Value) -> Value {
    req.get("id").cloned().unwrap_or(Value::Null)
}

fn get_payload(req: &Value) -> &Value {
    static EMPTY: Value = Value::Null;
    req.get("payload").unwrap_or(&EMPTY)
}

fn ok(id: Value, payload: Value) -> String {
    json!({
        "id": id,
        "status": "ok",
        "payload": payload
    })
    .to_string()
}

fn err(id: Value, message: impl Into<String>) -> String {
    json!({
        "id": id,
        "status": "error",
        "message": message.into()
    })
    .to_string()
}

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

fn required_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str> {
    str_field(payload, key).ok_or_else(|| Error::InvalidRequest(format!("payload.{key} is required")))
}

fn required<T: DeserializeOwned>(payload: &Value, key: &str) -> Result<T> {
    let value = payload
        .get(key)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| Error::InvalidRequest(format!("payload.{key} is required")))?;

    serde_json::from_value(value)
        .map_err(|e| Error::InvalidRequest(format!("invalid payload.{key}: {e}")))
}

/// Everything a command needs, built once per process.
pub struct Core {
    config: AppConfig,
    translator: Arc<dyn Translator>,
    codec: MarkdownCodec,
}

impl Core {
    /// Provider client wrapped in the configured retry policy.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let client = DeepLClient::new(config.provider_config())?;
        let translator = RetryingTranslator::new(client, config.retry_policy());
        Ok(Self::with_translator(config, Arc::new(translator)))
    }

    pub fn with_translator(config: AppConfig, translator: Arc<dyn Translator>) -> Self {
        let codec = config.codec();
        Self {
            config,
            translator,
            codec,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn translator(&self) -> &dyn Translator {
        self.translator.as_ref()
    }

    pub fn codec(&self) -> &MarkdownCodec {
        &self.codec
    }

    pub fn run_batch(&self, content_dir: Option<&Path>) -> Result<BatchReport> {
        self.config.ensure_credential()?;

        let batch_cfg = self.config.batch_config();
        let dir = content_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.batch.content_dir.clone());
        let source = DirectorySource::new(dir);

        let job = BatchJob::new(&batch_cfg, &source, self.translator(), &self.codec);

        if !self.config.images.enabled {
            return job.run();
        }

        let relocation = self.config.relocation_config()?;
        let fetcher = HttpImageFetcher::new(Duration::from_secs(self.config.images.timeout_secs))?;
        job.with_images(ImageRelocator::new(&relocation, &fetcher)).run()
    }

    /// File-backed runtime cache talking to the configured endpoint, or to
    /// this process's own translator when no endpoint URL is set.
    pub fn runtime_cache(&self) -> Result<RuntimeCache> {
        let storage = Arc::new(FileStorage::new(self.config.cache.dir.clone()));

        let endpoint: Arc<dyn TranslationEndpoint> = match &self.config.cache.endpoint_url {
            Some(url) => Arc::new(HttpEndpoint::new(
                url.clone(),
                Duration::from_secs(self.config.provider.timeout_secs),
            )?),
            None => Arc::new(LocalEndpoint::new(Arc::clone(&self.translator))),
        };

        Ok(RuntimeCache::new(storage, endpoint))
    }

    /// One JSON request line in, one JSON response line out.
    pub fn handle(&self, input: &str) -> String {
        let req: Value = match serde_json::from_str(input) {
            Ok(v) => v,
            Err(_) => {
                return json!({
                    "status": "error",
                    "message": "invalid json"
                })
                .to_string();
            }
        };

        let id = get_id(&req);
        let cmd_str = get_cmd(&req);
        let payload = get_payload(&req);

        let cmd = Command::from(cmd_str);
        if cmd == Command::Unknown {
            return err(id, "unknown command");
        }

        debug!(cmd = cmd_str, "handling command");

        match self.dispatch(cmd, payload) {
            Ok(out) => ok(id, out),
            Err(e) => err(id, e.to_string()),
        }
    }

    fn dispatch(&self, cmd: Command, payload: &Value) -> Result<Value> {
        match cmd {
            Command::Ping => Ok(json!({ "message": "lingo-core alive" })),

            Command::Translate => {
                let resp = endpoint::handle_translate(payload, self.translator());
                Ok(json!({ "status": resp.status, "body": resp.body }))
            }

            Command::MarkdownExtract => {
                let markdown = required_str(payload, "markdown")?;
                let extracted = self.codec.extract(markdown);
                Ok(json!({ "text": extracted.text, "tokens": extracted.table }))
            }

            Command::MarkdownRestore => {
                let text = payload.get("text").and_then(|v| v.as_str()).unwrap_or("");
                let tokens: TokenTable = required(payload, "tokens")?;
                let restored = self.codec.restore(text, &tokens);
                Ok(json!({ "text": restored.text, "unresolved": restored.unresolved }))
            }

            Command::TranslateDocument => {
                let doc: Document = required(payload, "document")?;
                let target: Language = required_str(payload, "targetLang")?.parse()?;
                let out = DocumentTranslator::new(self.translator(), &self.codec)
                    .translate_document(&doc, target)?;
                Ok(serde_json::to_value(out)?)
            }

            Command::ResolveTranslation => {
                let doc: Document = required(payload, "document")?;
                let source = self.config.languages.source;
                let active = match str_field(payload, "language") {
                    Some(code) => code.parse()?,
                    None => source,
                };
                let path = str_field(payload, "path")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| self.config.batch.store_path.clone());

                let map = translation_store::load(&path)?;
                let ctx = LanguageContext::new(source, active);
                Ok(json!({
                    "entry": map.resolve(&doc, &ctx),
                    "translated": ctx.is_source() || map.is_translated(&doc.id, active),
                }))
            }

            Command::BatchRun => {
                let dir = str_field(payload, "content_dir").map(PathBuf::from);
                let report = self.run_batch(dir.as_deref())?;
                Ok(serde_json::to_value(report)?)
            }

            Command::Unknown => Err(Error::InvalidRequest("unknown command".into())),
        }
    }
}
