use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::document::Document;
use crate::model::language::{Language, LanguageContext};

/// Title, description and body of one document in one language.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct TranslationEntry {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub markdown: String,
}

impl TranslationEntry {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            title: doc.title.clone(),
            description: doc.description.clone(),
            markdown: doc.markdown.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.markdown.trim().is_empty()
    }
}

/// document id -> language code -> entry.
///
/// Language keys stay plain strings so a file written with a language this
/// build does not know about survives a load/save cycle untouched.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct TranslationMap {
    documents: BTreeMap<String, BTreeMap<String, TranslationEntry>>,
}

impl TranslationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, id: &str, lang: Language) -> Option<&TranslationEntry> {
        self.documents.get(id).and_then(|langs| langs.get(lang.code()))
    }

    /// A pair counts as translated once it carries a non-empty body.
    pub fn is_translated(&self, id: &str, lang: Language) -> bool {
        self.get(id, lang).map(|e| e.is_complete()).unwrap_or(false)
    }

    /// Writes the source-language baseline only if none exists yet.
    /// Returns whether anything was written.
    pub fn insert_baseline(&mut self, id: &str, source: Language, entry: TranslationEntry) -> bool {
        let langs = self.documents.entry(id.to_string()).or_default();
        if langs.contains_key(source.code()) {
            return false;
        }
        langs.insert(source.code().to_string(), entry);
        true
    }

    /// Replaces the (id, lang) entry wholesale.
    pub fn insert(&mut self, id: &str, lang: Language, entry: TranslationEntry) {
        self.documents
            .entry(id.to_string())
            .or_default()
            .insert(lang.code().to_string(), entry);
    }

    pub fn remove(&mut self, id: &str, lang: Language) -> Option<TranslationEntry> {
        self.documents
            .get_mut(id)
            .and_then(|langs| langs.remove(lang.code()))
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(|k| k.as_str())
    }

    /// Entry to display for `doc` under `ctx`: the pre-computed translation for
    /// the active language when present, otherwise the source-language content
    /// as fetched.
    pub fn resolve(&self, doc: &Document, ctx: &LanguageContext) -> TranslationEntry {
        if !ctx.is_source() {
            if let Some(entry) = self.get(&doc.id, ctx.active) {
                if entry.is_complete() {
                    return entry.clone();
                }
            }
        }
        TranslationEntry::from_document(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, markdown: &str) -> TranslationEntry {
        TranslationEntry {
            title: title.into(),
            description: String::new(),
            markdown: markdown.into(),
        }
    }

    #[test]
    fn baseline_is_never_overwritten() {
        let mut map = TranslationMap::new();
        assert!(map.insert_baseline("p1", Language::Ko, entry("원본", "본문")));
        assert!(!map.insert_baseline("p1", Language::Ko, entry("새 제목", "새 본문")));
        assert_eq!(map.get("p1", Language::Ko).unwrap().title, "원본");
    }

    #[test]
    fn empty_markdown_is_not_translated() {
        let mut map = TranslationMap::new();
        map.insert("p1", Language::En, entry("Title", "  "));
        assert!(!map.is_translated("p1", Language::En));
        map.insert("p1", Language::En, entry("Title", "Body"));
        assert!(map.is_translated("p1", Language::En));
    }

    #[test]
    fn resolve_falls_back_to_source_content() {
        let doc = Document {
            id: "p1".into(),
            title: "제목".into(),
            markdown: "본문".into(),
            ..Default::default()
        };
        let mut map = TranslationMap::new();
        map.insert("p1", Language::En, entry("Title", "Body"));

        let ctx = LanguageContext::source_only(Language::Ko);
        assert_eq!(map.resolve(&doc, &ctx).title, "제목");
        assert_eq!(map.resolve(&doc, &ctx.with_active(Language::En)).title, "Title");
        assert_eq!(map.resolve(&doc, &ctx.with_active(Language::Ja)).title, "제목");
    }

    #[test]
    fn unknown_language_keys_survive_round_trip() {
        let raw = r#"{"p1":{"ko":{"title":"t","description":"","markdown":"m"},"zh":{"title":"x","description":"","markdown":"y"}}}"#;
        let map: TranslationMap = serde_json::from_str(raw).unwrap();
        let back = serde_json::to_string(&map).unwrap();
        assert!(back.contains("\"zh\""));
    }
}
