#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Translate,
    MarkdownExtract,
    MarkdownRestore,
    TranslateDocument,
    ResolveTranslation,
    BatchRun,
    Unknown,
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        match s {
            "ping" => Command::Ping,
            "translate" => Command::Translate,
            "markdown.extract" => Command::MarkdownExtract,
            "markdown.restore" => Command::MarkdownRestore,
            "translate_document" => Command::TranslateDocument,
            "translations.resolve" => Command::ResolveTranslation,
            "batch.run" => Command::BatchRun,
            _ => Command::Unknown,
        }
    }
}
