use serde::Serialize;
use std::path::PathBuf;
use std::{thread, time::Duration};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::model::document::Document;
use crate::model::language::Language;
use crate::model::translation::{TranslationEntry, TranslationMap};
use crate::parsers::markdown::MarkdownCodec;
use crate::services::content::ContentSource;
use crate::services::document::DocumentTranslator;
use crate::services::images::ImageRelocator;
use crate::services::provider::Translator;
use crate::services::translation_store;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub source: Language,
    pub targets: Vec<Language>,
    pub store_path: PathBuf,
    pub public_path: Option<PathBuf>,
    pub request_delay: Duration,
    pub allow_unresolved_tokens: bool,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    Translated,
    Skipped,
    Failed,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct PairOutcome {
    pub document_id: String,
    pub language: Language,
    pub state: PairState,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Default, Clone)]
pub struct BatchReport {
    pub documents: usize,
    pub translated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub images_downloaded: usize,
    pub outcomes: Vec<PairOutcome>,
}

impl BatchReport {
    fn record(&mut self, document_id: &str, language: Language, state: PairState, error: Option<String>) {
        match state {
            PairState::Translated => self.translated += 1,
            PairState::Skipped => self.skipped += 1,
            PairState::Failed => self.failed += 1,
        }
        self.outcomes.push(PairOutcome {
            document_id: document_id.to_string(),
            language,
            state,
            error,
        });
    }
}

/// Offline pre-translation of every published document into every target
/// language. Runs sequentially and flushes the map after each document, so
/// an interrupted run resumes where it stopped without re-spending quota.
pub struct BatchJob<'a> {
    cfg: &'a BatchConfig,
    source: &'a dyn ContentSource,
    translator: &'a dyn Translator,
    codec: &'a MarkdownCodec,
    images: Option<ImageRelocator<'a>>,
}

impl<'a> BatchJob<'a> {
    pub fn new(
        cfg: &'a BatchConfig,
        source: &'a dyn ContentSource,
        translator: &'a dyn Translator,
        codec: &'a MarkdownCodec,
    ) -> Self {
        Self {
            cfg,
            source,
            translator,
            codec,
            images: None,
        }
    }

    pub fn with_images(mut self, relocator: ImageRelocator<'a>) -> Self {
        self.images = Some(relocator);
        self
    }

    /// Fails only when the existing map or the content source is unusable;
    /// per-pair failures are reported, not returned.
    pub fn run(&self) -> Result<BatchReport> {
        let mut map = translation_store::load(&self.cfg.store_path)?;
        let docs = self.source.published()?;

        info!(documents = docs.len(), "starting translation run");

        if !self.translator.is_configured() {
            warn!("provider credential missing; translations will equal the source text");
        }

        let mut report = BatchReport {
            documents: docs.len(),
            ..Default::default()
        };

        for doc in &docs {
            info!(id = %doc.id, slug = %doc.slug, "processing document");
            self.process_document(doc, &mut map, &mut report);

            // bound loss on crash to the in-flight document
            translation_store::save(&self.cfg.store_path, &map)?;
        }

        if let Some(public) = &self.cfg.public_path {
            translation_store::publish(&self.cfg.store_path, public)?;
        }

        info!(
            translated = report.translated,
            skipped = report.skipped,
            failed = report.failed,
            "translation run complete"
        );

        Ok(report)
    }

    fn process_document(&self, doc: &Document, map: &mut TranslationMap, report: &mut BatchReport) {
        let source_lang = self.cfg.source;

        let basis = match &self.images {
            Some(relocator) => {
                let (markdown, images) = relocator.relocate(&doc.markdown);
                report.images_downloaded += images.downloaded;
                Document {
                    markdown,
                    ..doc.clone()
                }
            }
            None => doc.clone(),
        };

        map.insert_baseline(&doc.id, source_lang, TranslationEntry::from_document(&basis));

        let translator = DocumentTranslator::new(self.translator, self.codec);

        for &lang in &self.cfg.targets {
            if map.is_translated(&doc.id, lang) {
                info!(id = %doc.id, lang = lang.code(), "already translated, skipping");
                report.record(&doc.id, lang, PairState::Skipped, None);
                continue;
            }

            info!(id = %doc.id, lang = lang.code(), "translating");

            match self.translate_pair(&translator, &basis, lang) {
                Ok(entry) => {
                    info!(id = %doc.id, lang = lang.code(), title = %entry.title, "translated");
                    map.insert(&doc.id, lang, entry);
                    report.record(&doc.id, lang, PairState::Translated, None);
                }
                Err(e) => {
                    error!(id = %doc.id, lang = lang.code(), "translation failed: {e}");
                    report.record(&doc.id, lang, PairState::Failed, Some(e.to_string()));
                }
            }

            if !self.cfg.request_delay.is_zero() {
                thread::sleep(self.cfg.request_delay);
            }
        }
    }

    fn translate_pair(
        &self,
        translator: &DocumentTranslator<'_>,
        doc: &Document,
        lang: Language,
    ) -> Result<TranslationEntry> {
        let out = translator.translate_document(doc, lang)?;

        if !out.unresolved_tokens.is_empty() {
            if !self.cfg.allow_unresolved_tokens {
                return Err(Error::RestorationMismatch {
                    unresolved: out.unresolved_tokens.len(),
                });
            }
            warn!(
                id = %doc.id,
                lang = lang.code(),
                unresolved = out.unresolved_tokens.len(),
                "keeping translation with unrestored placeholders"
            );
        }

        Ok(out.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StaticSource(Vec<Document>);

    impl ContentSource for StaticSource {
        fn published(&self) -> Result<Vec<Document>> {
            Ok(self.0.clone())
        }
    }

    struct Counting {
        calls: AtomicUsize,
    }

    impl Translator for Counting {
        fn translate(&self, text: &str, target: Language) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("[{}] {}", target.code(), text))
        }
    }

    /// Drops every placeholder from the text it returns.
    struct Lossy;

    impl Translator for Lossy {
        fn translate(&self, _text: &str, _target: Language) -> Result<String> {
            Ok("lost everything".into())
        }
    }

    fn doc(id: &str) -> Document {
        Document {
            id: id.into(),
            slug: id.into(),
            title: format!("제목 {id}"),
            description: String::new(),
            markdown: "본문 `code`".into(),
            ..Default::default()
        }
    }

    fn config(tmp: &TempDir) -> BatchConfig {
        BatchConfig {
            source: Language::Ko,
            targets: vec![Language::En, Language::Ja],
            store_path: tmp.path().join("translations.json"),
            public_path: None,
            request_delay: Duration::ZERO,
            allow_unresolved_tokens: false,
        }
    }

    #[test]
    fn writes_baseline_and_every_target() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let source = StaticSource(vec![doc("a")]);
        let t = Counting { calls: AtomicUsize::new(0) };
        let codec = MarkdownCodec::default();

        let report = BatchJob::new(&cfg, &source, &t, &codec).run().unwrap();
        assert_eq!(report.translated, 2);

        let map = translation_store::load(&cfg.store_path).unwrap();
        assert_eq!(map.get("a", Language::Ko).unwrap().title, "제목 a");
        assert_eq!(map.get("a", Language::En).unwrap().markdown, "[en] 본문 `code`");
        assert_eq!(map.get("a", Language::Ja).unwrap().title, "[ja] 제목 a");
    }

    #[test]
    fn rerun_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let source = StaticSource(vec![doc("a"), doc("b")]);
        let t = Counting { calls: AtomicUsize::new(0) };
        let codec = MarkdownCodec::default();

        BatchJob::new(&cfg, &source, &t, &codec).run().unwrap();
        let first = std::fs::read_to_string(&cfg.store_path).unwrap();
        let calls = t.calls.load(Ordering::SeqCst);

        let report = BatchJob::new(&cfg, &source, &t, &codec).run().unwrap();
        assert_eq!(t.calls.load(Ordering::SeqCst), calls);
        assert_eq!(report.translated, 0);
        assert_eq!(report.skipped, 4);
        assert_eq!(std::fs::read_to_string(&cfg.store_path).unwrap(), first);
    }

    #[test]
    fn baseline_survives_changed_source() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let t = Counting { calls: AtomicUsize::new(0) };
        let codec = MarkdownCodec::default();

        BatchJob::new(&cfg, &StaticSource(vec![doc("a")]), &t, &codec).run().unwrap();

        let mut edited = doc("a");
        edited.title = "바뀐 제목".into();
        BatchJob::new(&cfg, &StaticSource(vec![edited]), &t, &codec).run().unwrap();

        let map = translation_store::load(&cfg.store_path).unwrap();
        assert_eq!(map.get("a", Language::Ko).unwrap().title, "제목 a");
    }

    #[test]
    fn unresolved_placeholders_fail_the_pair() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let codec = MarkdownCodec::default();

        let report = BatchJob::new(&cfg, &StaticSource(vec![doc("a")]), &Lossy, &codec)
            .run()
            .unwrap();
        assert_eq!(report.failed, 2);
        assert!(report.outcomes.iter().all(|o| o.error.is_some()));

        let map = translation_store::load(&cfg.store_path).unwrap();
        assert!(map.get("a", Language::Ko).is_some());
        assert!(!map.is_translated("a", Language::En));
    }

    #[test]
    fn unresolved_placeholders_can_be_allowed() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(&tmp);
        cfg.allow_unresolved_tokens = true;
        let codec = MarkdownCodec::default();

        let report = BatchJob::new(&cfg, &StaticSource(vec![doc("a")]), &Lossy, &codec)
            .run()
            .unwrap();
        assert_eq!(report.translated, 2);
    }
}
