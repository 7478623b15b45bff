use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ko,
    En,
    Ja,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Ko, Language::En, Language::Ja];

    pub fn code(self) -> &'static str {
        match self {
            Language::Ko => "ko",
            Language::En => "en",
            Language::Ja => "ja",
        }
    }

    /// Code expected by the provider's `target_lang` / `source_lang` fields.
    pub fn provider_code(self) -> &'static str {
        match self {
            Language::Ko => "KO",
            Language::En => "EN",
            Language::Ja => "JA",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Language::Ko => "한국어",
            Language::En => "English",
            Language::Ja => "日本語",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Ko
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ko" => Ok(Language::Ko),
            "en" => Ok(Language::En),
            "ja" => Ok(Language::Ja),
            other => Err(Error::InvalidRequest(format!(
                "unsupported language: {other}"
            ))),
        }
    }
}

/// The language documents are authored in, and the one being displayed.
///
/// Passed explicitly into rendering and into the runtime cache instead of
/// living in shared mutable state.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct LanguageContext {
    pub source: Language,
    pub active: Language,
}

impl LanguageContext {
    pub fn new(source: Language, active: Language) -> Self {
        Self { source, active }
    }

    pub fn source_only(source: Language) -> Self {
        Self {
            source,
            active: source,
        }
    }

    pub fn is_source(&self) -> bool {
        self.source == self.active
    }

    pub fn with_active(self, active: Language) -> Self {
        Self { active, ..self }
    }

    /// Every language except the source one, in declaration order.
    pub fn targets(&self) -> Vec<Language> {
        Language::ALL
            .iter()
            .copied()
            .filter(|l| *l != self.source)
            .collect()
    }
}
