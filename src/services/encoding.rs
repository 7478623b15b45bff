//! Charset handling for markdown bodies exported by the content source.

use std::fs;
use std::path::Path;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: String,
    pub confidence: f32,
}

/// Decodes `bytes`, honouring a UTF-8 BOM, accepting valid UTF-8 as is and
/// otherwise falling back to a chardetng guess.
pub fn decode(bytes: &[u8]) -> DecodedText {
    // BOM UTF-8 (EF BB BF)
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return DecodedText {
            text: String::from_utf8_lossy(rest).into_owned(),
            encoding: "utf-8-sig".into(),
            confidence: 0.99,
        };
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodedText {
            text: text.to_string(),
            encoding: "utf-8".into(),
            confidence: estimate_confidence(bytes, UTF_8),
        };
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    let confidence = estimate_confidence(bytes, encoding);

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!(encoding = encoding.name(), "body decoded with replacement characters");
    }

    DecodedText {
        text: text.into_owned(),
        encoding: encoding.name().to_lowercase(),
        confidence,
    }
}

pub fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .map_err(|e| Error::ContentSource(format!("failed to read {}: {e}", path.display())))?;

    let decoded = decode(&bytes);
    if decoded.encoding != "utf-8" && decoded.encoding != "utf-8-sig" {
        warn!(
            path = %path.display(),
            encoding = %decoded.encoding,
            confidence = decoded.confidence,
            "body is not UTF-8, converted"
        );
    }

    Ok(decoded.text)
}

fn estimate_confidence(bytes: &[u8], encoding: &'static Encoding) -> f32 {
    let (text, _, had_errors) = encoding.decode(bytes);

    if had_errors {
        return 0.35;
    }

    let len = text.len();
    if len < 64 {
        0.55
    } else if len < 512 {
        0.70
    } else if len < 4096 {
        0.82
    } else {
        0.90
    }
}
