//! Local API key file.
//!
//! Keys are stored as a JSON object of field → obfuscated value. The
//! obfuscation (base64, reversed, `|<tag length>` suffix) only keeps keys
//! from being read at a glance. It is NOT encryption: anyone with the file
//! can recover every key.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

/// Only its length is written, as a format marker.
const OBFUSCATION_TAG: &str = "recipe-genius-2025";
pub const DEFAULT_FILE_NAME: &str = ".recipe-genius-keys.json";

/// Fields a keystore can hold. `doubaoEndpointId` and
/// `preferredRecipeProvider` are stored the same way as keys.
pub const FIELDS: [&str; 7] =
    ["deepseek", "doubao", "doubaoEndpointId", "qwen", "glm", "gemini", "preferredRecipeProvider"];

#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("unknown keystore field `{0}`")]
    UnknownField(String),
    #[error("keystore io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("keystore is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decoded keystore contents, keyed by the names in [`FIELDS`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredKeys(BTreeMap<String, String>);

impl StoredKeys {
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Set `field`, or clear it when `value` is blank.
    ///
    /// # Errors
    ///
    /// [`KeystoreError::UnknownField`] for names outside [`FIELDS`].
    pub fn set(&mut self, field: &str, value: &str) -> Result<(), KeystoreError> {
        if !FIELDS.contains(&field) {
            return Err(KeystoreError::UnknownField(field.to_owned()));
        }
        let value = value.trim();
        if value.is_empty() {
            self.0.remove(field);
        } else {
            self.0.insert(field.to_owned(), value.to_owned());
        }
        Ok(())
    }

    pub fn remove(&mut self, field: &str) -> bool {
        self.0.remove(field).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `apiKeys` object the server accepts. Doubao is only sent with
    /// its endpoint id.
    #[must_use]
    pub fn api_keys_json(&self) -> Value {
        let mut out = Map::new();
        for provider in ["deepseek", "qwen", "glm", "gemini"] {
            if let Some(key) = self.get(provider) {
                out.insert(provider.to_owned(), Value::String(key.to_owned()));
            }
        }
        if let (Some(key), Some(endpoint)) = (self.get("doubao"), self.get("doubaoEndpointId")) {
            out.insert("doubao".to_owned(), serde_json::json!({ "key": key, "endpointId": endpoint }));
        }
        Value::Object(out)
    }
}

/// Default keystore location: `$HOME/.recipe-genius-keys.json`, else the
/// working directory.
#[must_use]
pub fn default_path() -> PathBuf {
    std::env::var_os("HOME").map_or_else(|| PathBuf::from(DEFAULT_FILE_NAME), |home| {
        PathBuf::from(home).join(DEFAULT_FILE_NAME)
    })
}

/// Read and decode the keystore.
///
/// A missing file is an empty store. Entries that fail to decode are
/// skipped.
///
/// # Errors
///
/// I/O failures other than not-found, or a file that is not a JSON object
/// of strings.
pub fn load(path: &Path) -> Result<StoredKeys, KeystoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoredKeys::default()),
        Err(e) => return Err(e.into()),
    };
    let encoded: BTreeMap<String, String> = serde_json::from_str(&raw)?;
    let decoded = encoded
        .into_iter()
        .filter_map(|(field, value)| reveal(&value).map(|plain| (field, plain)))
        .collect();
    Ok(StoredKeys(decoded))
}

/// Encode and write the keystore, replacing the file. On Unix the file is
/// left readable by its owner only (0600).
///
/// # Errors
///
/// Serialization or I/O failures.
pub fn save(path: &Path, keys: &StoredKeys) -> Result<(), KeystoreError> {
    let encoded: BTreeMap<&str, String> = keys.iter().map(|(field, value)| (field, obfuscate(value))).collect();
    let json = serde_json::to_string_pretty(&encoded)?;

    let mut options = std::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        // `mode` only applies when the file is created.
        if path.exists() {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
    }
    let mut file = options.open(path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

/// base64, reversed, then `|<tag length>`.
#[must_use]
pub fn obfuscate(plain: &str) -> String {
    let encoded: String = STANDARD.encode(plain).chars().rev().collect();
    format!("{encoded}|{}", OBFUSCATION_TAG.len())
}

/// Inverse of [`obfuscate`]. `None` for anything it did not produce.
#[must_use]
pub fn reveal(stored: &str) -> Option<String> {
    let (body, tag_len) = stored.rsplit_once('|')?;
    if tag_len.parse::<usize>().ok()? != OBFUSCATION_TAG.len() {
        return None;
    }
    let encoded: String = body.chars().rev().collect();
    let bytes = STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

/// `sk-1****cdef`; keys shorter than 8 chars become `****`.
#[must_use]
pub fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 8 {
        return "****".to_owned();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

/// Local shape check before a key is saved or probed.
#[must_use]
pub fn looks_valid(provider: &str, key: &str) -> bool {
    let key = key.trim();
    match provider {
        "deepseek" | "qwen" => key.starts_with("sk-") && key.len() > 20,
        "doubao" | "glm" => key.len() > 10,
        "gemini" => key.starts_with("AIza") && key.len() > 30,
        _ => key.len() > 5,
    }
}

#[cfg(test)]
#[path = "keystore_test.rs"]
mod tests;
