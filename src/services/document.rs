use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::model::document::Document;
use crate::model::language::Language;
use crate::model::translation::TranslationEntry;
use crate::parsers::markdown::{Extracted, MarkdownCodec, TokenStyle};
use crate::services::provider::Translator;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct TranslatedDocument {
    pub entry: TranslationEntry,
    /// Placeholder indices the provider dropped or mangled beyond recognition.
    pub unresolved_tokens: Vec<usize>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct TranslatedMarkdown {
    pub markdown: String,
    pub unresolved_tokens: Vec<usize>,
}

/// Translates whole documents: plain strings for title and description, the
/// placeholder round trip for the body. Holds no state between calls.
pub struct DocumentTranslator<'a> {
    translator: &'a dyn Translator,
    codec: &'a MarkdownCodec,
}

impl<'a> DocumentTranslator<'a> {
    pub fn new(translator: &'a dyn Translator, codec: &'a MarkdownCodec) -> Self {
        Self { translator, codec }
    }

    pub fn translate_document(&self, doc: &Document, target: Language) -> Result<TranslatedDocument> {
        let title = self.translate_plain(&doc.title, target)?;
        let description = self.translate_plain(&doc.description, target)?;
        let body = self.translate_markdown(&doc.markdown, target)?;

        Ok(TranslatedDocument {
            entry: TranslationEntry {
                title,
                description,
                markdown: body.markdown,
            },
            unresolved_tokens: body.unresolved_tokens,
        })
    }

    pub fn translate_markdown(&self, markdown: &str, target: Language) -> Result<TranslatedMarkdown> {
        if markdown.trim().is_empty() {
            return Ok(TranslatedMarkdown {
                markdown: markdown.to_string(),
                unresolved_tokens: Vec::new(),
            });
        }

        let extracted = self.codec.extract(markdown);

        // nothing but protected spans: no provider call needed
        if is_only_markers(&extracted, self.codec.style()) {
            let restored = self.codec.restore(&extracted.text, &extracted.table);
            return Ok(TranslatedMarkdown {
                markdown: restored.text,
                unresolved_tokens: restored.unresolved,
            });
        }

        let translated = self.translator.translate(&extracted.text, target)?;
        let restored = self.codec.restore(&translated, &extracted.table);

        debug!(
            tokens = extracted.table.len(),
            unresolved = restored.unresolved.len(),
            "markdown body translated"
        );

        Ok(TranslatedMarkdown {
            markdown: restored.text,
            unresolved_tokens: restored.unresolved,
        })
    }

    fn translate_plain(&self, text: &str, target: Language) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }
        self.translator.translate(text, target)
    }
}

fn is_only_markers(extracted: &Extracted, style: TokenStyle) -> bool {
    let mut rest = extracted.text.clone();
    for token in extracted.table.iter() {
        rest = rest.replace(&style.render(token.index), "");
    }
    rest.trim().is_empty()
}
