pub mod document;
pub mod language;
pub mod translation;
