pub mod batch;
pub mod content;
pub mod document;
pub mod encoding;
pub mod images;
pub mod provider;
pub mod runtime_cache;
pub mod translation_store;
