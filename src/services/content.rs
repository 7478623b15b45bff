use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::document::Document;
use crate::services::encoding;

const MANIFEST_FILE: &str = "posts.json";
const PUBLISHED: &str = "Published";

/// Supplier of the source-language documents. Treated as read-only and as
/// the only source of truth for source-language content.
pub trait ContentSource {
    fn published(&self) -> Result<Vec<Document>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostMeta {
    id: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    author: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    modified_date: String,
    #[serde(default)]
    status: String,
    /// Body path relative to the source root; `<id>.md` when absent.
    #[serde(default)]
    file: Option<String>,
}

/// Export directory: a `posts.json` manifest plus one markdown file per post.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn body_path(&self, meta: &PostMeta) -> PathBuf {
        match meta.file.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            Some(file) => self.root.join(file),
            None => self.root.join(format!("{}.md", meta.id)),
        }
    }
}

impl ContentSource for DirectorySource {
    fn published(&self) -> Result<Vec<Document>> {
        let manifest = self.root.join(MANIFEST_FILE);
        let data = fs::read_to_string(&manifest).map_err(|e| {
            Error::ContentSource(format!("failed to read {}: {e}", manifest.display()))
        })?;

        let metas: Vec<PostMeta> = serde_json::from_str(&data).map_err(|e| {
            Error::ContentSource(format!("invalid {}: {e}", manifest.display()))
        })?;

        let mut docs = Vec::with_capacity(metas.len());

        for meta in metas {
            if meta.status != PUBLISHED {
                debug!(id = %meta.id, status = %meta.status, "skipping unpublished post");
                continue;
            }

            if meta.id.trim().is_empty() {
                warn!("manifest entry without id ignored");
                continue;
            }

            let markdown = encoding::read_text(&self.body_path(&meta))?;

            docs.push(Document {
                slug: if meta.slug.trim().is_empty() {
                    meta.id.clone()
                } else {
                    meta.slug
                },
                id: meta.id,
                title: meta.title,
                description: meta.description,
                markdown,
                tags: meta.tags,
                author: meta.author,
                date: meta.date,
                modified_date: meta.modified_date,
            });
        }

        Ok(docs)
    }
}
