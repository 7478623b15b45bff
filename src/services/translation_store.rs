use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::translation::TranslationMap;

/// Missing file means "nothing translated yet". A file that exists but cannot
/// be read or parsed is an error: saving over it would lose every entry.
pub fn load(path: &Path) -> Result<TranslationMap> {
    if !path.exists() {
        debug!(path = %path.display(), "no translation map yet, starting fresh");
        return Ok(TranslationMap::new());
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::Persistence(format!("failed to read {}: {e}", path.display())))?;

    if data.trim().is_empty() {
        return Ok(TranslationMap::new());
    }

    let map: TranslationMap = serde_json::from_str(&data)
        .map_err(|e| Error::Persistence(format!("failed to parse {}: {e}", path.display())))?;

    info!(path = %path.display(), documents = map.len(), "loaded existing translations");
    Ok(map)
}

pub fn save(path: &Path, map: &TranslationMap) -> Result<()> {
    let json = serde_json::to_string_pretty(map)?;
    write_atomic(path, json.as_bytes())
}

/// Copies the persisted map to where it is served as a static asset.
pub fn publish(from: &Path, to: &Path) -> Result<()> {
    if from == to {
        return Ok(());
    }

    let bytes = fs::read(from)
        .map_err(|e| Error::Persistence(format!("failed to read {}: {e}", from.display())))?;
    write_atomic(to, &bytes)?;

    info!(path = %to.display(), "published translations");
    Ok(())
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);

    if let Some(parent) = tmp.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| persistence(parent, e))?;
        }
    }

    fs::write(&tmp, bytes).map_err(|e| persistence(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| persistence(path, e))?;

    Ok(())
}

fn persistence(path: &Path, e: std::io::Error) -> Error {
    Error::Persistence(format!("{}: {e}", path.display()))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let file_name = match path.file_name().and_then(|s| s.to_str()) {
        Some(n) => n.to_string(),
        None => "translations.json".to_string(),
    };
    p.set_file_name(format!("{file_name}.tmp"));
    p
}
