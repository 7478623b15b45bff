//! Markdown-safe translation of blog content: offline batch pre-translation
//! into a persisted map, plus a runtime cache for strings the batch missed.

pub mod config;
pub mod error;
pub mod model;
pub mod parsers;
pub mod protocol;
pub mod services;

pub use error::{Error, Result};
