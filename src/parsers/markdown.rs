//! Placeholder codec for markdown.
//!
//! `extract` swaps every span a translation engine must not touch (code,
//! images, link targets, raw HTML) for an inert marker and returns the table
//! needed to put the spans back. `restore` finds the markers again in the
//! engine's output, including the mangled forms engines are known to produce,
//! and reinserts the original spans verbatim.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, warn};

const MARKER_WORD: &str = "PLACEHOLDER";
const TAG_NAME: &str = "ph";

// Private-use code points; restored spans are never scanned for markers again.
const SENTINEL_OPEN: char = '\u{E000}';
const SENTINEL_CLOSE: char = '\u{E001}';

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenStyle {
    /// `__PLACEHOLDER_<n>__`
    #[default]
    Text,
    /// `<ph id="<n>"/>`, for providers running XML tag handling.
    Tag,
}

impl TokenStyle {
    pub fn render(self, index: usize) -> String {
        match self {
            TokenStyle::Text => format!("__{MARKER_WORD}_{index}__"),
            TokenStyle::Tag => format!("<{TAG_NAME} id=\"{index}\"/>"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlaceholderToken {
    pub index: usize,
    pub original: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct TokenTable {
    tokens: Vec<PlaceholderToken>,
}

impl TokenTable {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PlaceholderToken> {
        self.tokens.iter().find(|t| t.index == index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlaceholderToken> {
        self.tokens.iter()
    }

    fn take(&mut self, index: usize) -> Option<PlaceholderToken> {
        let pos = self.tokens.iter().position(|t| t.index == index)?;
        Some(self.tokens.remove(pos))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub table: TokenTable,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Restored {
    pub text: String,
    /// Indices of tokens that could not be located; their spans are missing
    /// from `text`.
    pub unresolved: Vec<usize>,
}

impl Restored {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// One family of marker mutations observed in provider output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantRule {
    Exact,
    /// `PLACEHOLDER_3__`
    StripLeadingUnderscores,
    /// `\_\_PLACEHOLDER\_3\_\_`
    EscapedUnderscores,
    /// `  PLACEHOLDER 3  `
    UnderscoresToSpaces,
    /// `＿＿PLACEHOLDER＿3＿＿`
    FullwidthUnderscores,
    /// Marker word rendered in another script, e.g. `プレースホルダー_3__`.
    Transliterated(String),
    /// `<ph id="3" />`, `<ph id="3"></ph>`, `<ph id='3'/>`
    TagForms,
}

impl VariantRule {
    fn forms(&self, style: TokenStyle, index: usize) -> Vec<String> {
        match (style, self) {
            (_, VariantRule::Exact) => vec![style.render(index)],
            (TokenStyle::Text, VariantRule::StripLeadingUnderscores) => {
                vec![format!("{MARKER_WORD}_{index}__")]
            }
            (TokenStyle::Text, VariantRule::EscapedUnderscores) => {
                vec![format!("\\_\\_{MARKER_WORD}\\_{index}\\_\\_")]
            }
            (TokenStyle::Text, VariantRule::UnderscoresToSpaces) => {
                vec![format!("  {MARKER_WORD} {index}  ")]
            }
            (TokenStyle::Text, VariantRule::FullwidthUnderscores) => {
                vec![format!("＿＿{MARKER_WORD}＿{index}＿＿")]
            }
            (TokenStyle::Text, VariantRule::Transliterated(word)) => {
                vec![format!("__{word}_{index}__"), format!("{word}_{index}__")]
            }
            (TokenStyle::Tag, VariantRule::TagForms) => vec![
                format!("<{TAG_NAME} id=\"{index}\" />"),
                format!("<{TAG_NAME} id=\"{index}\"></{TAG_NAME}>"),
                format!("<{TAG_NAME} id='{index}'/>"),
            ],
            _ => Vec::new(),
        }
    }
}

/// Ordered list of mutation rules tried when restoring a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSet {
    rules: Vec<VariantRule>,
}

impl VariantSet {
    pub fn new(rules: Vec<VariantRule>) -> Self {
        Self { rules }
    }

    /// Built-in rules for `style`, plus one transliteration rule per entry of
    /// `transliterations`.
    pub fn defaults(style: TokenStyle, transliterations: &[String]) -> Self {
        let mut rules = vec![VariantRule::Exact];
        match style {
            TokenStyle::Text => {
                rules.push(VariantRule::EscapedUnderscores);
                rules.push(VariantRule::FullwidthUnderscores);
                rules.push(VariantRule::StripLeadingUnderscores);
                rules.push(VariantRule::UnderscoresToSpaces);
                for word in transliterations {
                    if !word.trim().is_empty() {
                        rules.push(VariantRule::Transliterated(word.trim().to_string()));
                    }
                }
            }
            TokenStyle::Tag => rules.push(VariantRule::TagForms),
        }
        Self { rules }
    }

    pub fn push(&mut self, rule: VariantRule) {
        if !self.rules.contains(&rule) {
            self.rules.push(rule);
        }
    }

    pub fn rules(&self) -> &[VariantRule] {
        &self.rules
    }

    fn forms(&self, style: TokenStyle, index: usize) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for rule in &self.rules {
            for form in rule.forms(style, index) {
                if !out.contains(&form) {
                    out.push(form);
                }
            }
        }
        out
    }
}

pub fn default_transliterations() -> Vec<String> {
    vec!["プレースホルダー".to_string(), "プレースホルダ".to_string()]
}

struct Patterns {
    fenced_code: Regex,
    inline_code: Regex,
    image: Regex,
    link: Regex,
    details_block: Regex,
    html_tag: Regex,
    text_marker: Regex,
    tag_marker: Regex,
    sentinel: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        fenced_code: Regex::new(r"```[\s\S]*?```").unwrap(),
        inline_code: Regex::new(r"`[^`]+`").unwrap(),
        image: Regex::new(r"!\[[^\]]*\]\([^)]+\)").unwrap(),
        link: Regex::new(r"\[(?P<text>[^\]]+)\]\((?P<url>[^)]+)\)").unwrap(),
        details_block: Regex::new(r"(?is)<details\b.*?</details\s*>").unwrap(),
        html_tag: Regex::new(r"<[^>]+>").unwrap(),
        text_marker: Regex::new(r"__PLACEHOLDER_(\d+)__").unwrap(),
        tag_marker: Regex::new(r#"<ph id="(\d+)"/>"#).unwrap(),
        sentinel: Regex::new("\u{E000}(\\d+)\u{E001}").unwrap(),
    })
}

#[derive(Debug, Clone)]
pub struct MarkdownCodec {
    style: TokenStyle,
    variants: VariantSet,
}

impl Default for MarkdownCodec {
    fn default() -> Self {
        Self::with_style(TokenStyle::Text)
    }
}

impl MarkdownCodec {
    pub fn new(style: TokenStyle, variants: VariantSet) -> Self {
        Self { style, variants }
    }

    pub fn with_style(style: TokenStyle) -> Self {
        Self::new(style, VariantSet::defaults(style, &default_transliterations()))
    }

    pub fn style(&self) -> TokenStyle {
        self.style
    }

    fn marker_pattern(&self) -> &'static Regex {
        match self.style {
            TokenStyle::Text => &patterns().text_marker,
            TokenStyle::Tag => &patterns().tag_marker,
        }
    }

    pub fn extract(&self, markdown: &str) -> Extracted {
        let p = patterns();

        if self.marker_pattern().is_match(markdown) {
            warn!("source markdown already contains placeholder-shaped text; it may be rewritten on restore");
        }

        let mut pass = ExtractPass {
            style: self.style,
            marker: self.marker_pattern(),
            table: TokenTable::default(),
            next_index: 0,
        };

        // 1. fenced code blocks; spans come straight from the source here
        let text = p
            .fenced_code
            .replace_all(markdown, |c: &regex::Captures| pass.protect(&c[0], false))
            .into_owned();

        // 2. inline code
        let text = p
            .inline_code
            .replace_all(&text, |c: &regex::Captures| pass.protect(&c[0], true))
            .into_owned();

        // 3. images, whole reference
        let text = p
            .image
            .replace_all(&text, |c: &regex::Captures| pass.protect(&c[0], true))
            .into_owned();

        // 4. link target only, the label stays translatable
        let text = p
            .link
            .replace_all(&text, |c: &regex::Captures| {
                let url = pass.protect(&c["url"], true);
                format!("[{}]({})", &c["text"], url)
            })
            .into_owned();

        // 5. collapsible blocks as one unit
        let text = p
            .details_block
            .replace_all(&text, |c: &regex::Captures| pass.protect(&c[0], true))
            .into_owned();

        // 6. whatever raw HTML tags remain
        let text = p
            .html_tag
            .replace_all(&text, |c: &regex::Captures| {
                if pass.is_own_marker(&c[0]) {
                    c[0].to_string()
                } else {
                    pass.protect(&c[0], true)
                }
            })
            .into_owned();

        debug!(tokens = pass.table.len(), "extracted protected spans");

        Extracted {
            text,
            table: pass.table,
        }
    }

    pub fn restore(&self, translated: &str, table: &TokenTable) -> Restored {
        let mut text = translated.to_string();
        let mut unresolved = Vec::new();

        let mut indices: Vec<usize> = table.iter().map(|t| t.index).collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));

        for index in indices {
            let alternation = self
                .variants
                .forms(self.style, index)
                .iter()
                .map(|f| regex::escape(f))
                .collect::<Vec<_>>()
                .join("|");

            let re = match RegexBuilder::new(&alternation)
                .case_insensitive(true)
                .build()
            {
                Ok(re) => re,
                Err(e) => {
                    warn!(index, "could not build restore pattern: {e}");
                    unresolved.push(index);
                    continue;
                }
            };

            let sentinel = format!("{SENTINEL_OPEN}{index}{SENTINEL_CLOSE}");
            let (replaced, hits) = replace_forms(&re, &text, &sentinel);
            if hits == 0 {
                unresolved.push(index);
            }
            text = replaced;
        }

        let text = patterns()
            .sentinel
            .replace_all(&text, |c: &regex::Captures| {
                c[1].parse::<usize>()
                    .ok()
                    .and_then(|i| table.get(i))
                    .map(|t| t.original.clone())
                    .unwrap_or_else(|| c[0].to_string())
            })
            .into_owned();

        unresolved.sort_unstable();
        if !unresolved.is_empty() {
            warn!(
                unresolved = unresolved.len(),
                total = table.len(),
                "placeholder tokens missing from translated text"
            );
        }

        Restored { text, unresolved }
    }
}

struct ExtractPass {
    style: TokenStyle,
    marker: &'static Regex,
    table: TokenTable,
    next_index: usize,
}

impl ExtractPass {
    /// Records `span` and returns the marker standing in for it. With
    /// `absorb`, markers of earlier stages nested in the span are expanded
    /// first so the stored original is always plain source text.
    fn protect(&mut self, span: &str, absorb: bool) -> String {
        let original = if absorb {
            self.absorb_nested(span)
        } else {
            span.to_string()
        };

        let index = self.next_index;
        self.next_index += 1;
        self.table.tokens.push(PlaceholderToken { index, original });
        self.style.render(index)
    }

    fn absorb_nested(&mut self, span: &str) -> String {
        let marker = self.marker;
        let mut out = String::with_capacity(span.len());
        let mut last = 0;

        for caps in marker.captures_iter(span) {
            let (Some(whole), Some(num)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(token) = num
                .as_str()
                .parse::<usize>()
                .ok()
                .and_then(|i| self.table.take(i))
            else {
                continue;
            };
            out.push_str(&span[last..whole.start()]);
            out.push_str(&token.original);
            last = whole.end();
        }

        out.push_str(&span[last..]);
        out
    }

    fn is_own_marker(&self, candidate: &str) -> bool {
        self.marker
            .captures(candidate)
            .and_then(|c| c.get(0))
            .map(|m| m.start() == 0 && m.end() == candidate.len())
            .unwrap_or(false)
    }
}

fn replace_forms(re: &Regex, haystack: &str, sentinel: &str) -> (String, usize) {
    let mut out = String::with_capacity(haystack.len());
    let mut last = 0;
    let mut hits = 0;

    for m in re.find_iter(haystack) {
        // token 1 must never eat the front of token 10
        let ends_in_digit = m.as_str().ends_with(|c: char| c.is_ascii_digit());
        let digit_follows = haystack[m.end()..].starts_with(|c: char| c.is_ascii_digit());
        if ends_in_digit && digit_follows {
            continue;
        }

        out.push_str(&haystack[last..m.start()]);
        out.push_str(sentinel);
        last = m.end();
        hits += 1;
    }

    out.push_str(&haystack[last..]);
    (out, hits)
}

/// `extract` with the default text-style codec.
pub fn extract(markdown: &str) -> Extracted {
    MarkdownCodec::default().extract(markdown)
}

/// `restore` with the default text-style codec.
pub fn restore(translated: &str, table: &TokenTable) -> Restored {
    MarkdownCodec::default().restore(translated, table)
}
