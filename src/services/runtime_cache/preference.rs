use tracing::warn;

use crate::error::Result;
use crate::model::language::{Language, LanguageContext};

use super::storage::CacheStorage;

pub const LANGUAGE_KEY: &str = "language";

/// Stored display language, or the source language when nothing valid is
/// stored.
pub fn load_context(storage: &dyn CacheStorage, source: Language) -> LanguageContext {
    let ctx = LanguageContext::source_only(source);

    match storage.get_item(LANGUAGE_KEY) {
        Some(raw) => match raw.parse::<Language>() {
            Ok(active) => ctx.with_active(active),
            Err(_) => {
                warn!(value = %raw, "ignoring invalid stored language");
                ctx
            }
        },
        None => ctx,
    }
}

pub fn save_language(storage: &dyn CacheStorage, lang: Language) -> Result<()> {
    storage.set_item(LANGUAGE_KEY, lang.code())
}
