//! Configuration root loading and the persistent request list. The CLI
//! passes a directory; `config.json` inside it holds the service settings,
//! with relative paths resolved against the directory.

use serde::Deserialize;
use serde_json::Value;

use std::fs;
use std::path::{Path, PathBuf};

use crate::common::{Address, Error};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_http_bind")]
    pub http_bind: String,
    /// The service starts answering once the stream is this many blocks
    /// past the height known at startup.
    #[serde(default = "default_working_offset")]
    pub working_offset: u32,
    /// How many recent headers stay in memory.
    #[serde(default = "default_header_window")]
    pub header_window: usize,
    /// Address-scheme byte.
    #[serde(default = "default_chain_id")]
    pub chain_id: u8,
    #[serde(default)]
    pub requests_file: Option<PathBuf>,
}

fn default_db_path() -> PathBuf {
    "db".into()
}

fn default_http_bind() -> String {
    "0.0.0.0:6890".into()
}

fn default_working_offset() -> u32 {
    1
}

fn default_header_window() -> usize {
    100
}

fn default_chain_id() -> u8 {
    b'W'
}

impl AppConfig {
    /// Read `<root>/config.json` and resolve relative paths against the
    /// root. A missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let path = root.join("config.json");
        let mut cfg: AppConfig = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| {
                Error::Config(format!("{}: {}", path.display(), e))
            })?;
            serde_json::from_str(&raw).map_err(|e| {
                Error::Config(format!("{}: {}", path.display(), e))
            })?
        } else {
            serde_json::from_str("{}").unwrap()
        };
        if cfg.db_path.is_relative() {
            cfg.db_path = root.join(&cfg.db_path);
        }
        if let Some(requests) = &cfg.requests_file {
            if requests.is_relative() {
                cfg.requests_file = Some(root.join(requests));
            }
        }
        Ok(cfg)
    }
}

#[derive(Deserialize, serde::Serialize)]
struct RequestEntry {
    address: Address,
    request: Value,
}

/// Request list: a JSON array of `{address, request}` entries.
pub fn load_request_list(
    path: &Path,
) -> Result<Vec<(Address, Value)>, Error> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    let entries: Vec<RequestEntry> = serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(entries
        .into_iter()
        .map(|e| (e.address, e.request))
        .collect())
}

/// Snapshot the registered requests back to disk so the next run can seed
/// itself.
pub fn save_request_list(
    path: &Path, requests: Vec<(Address, Value)>,
) -> Result<(), Error> {
    let entries: Vec<RequestEntry> = requests
        .into_iter()
        .map(|(address, request)| RequestEntry { address, request })
        .collect();
    let raw = serde_json::to_string_pretty(&entries)
        .map_err(|e| Error::Config(e.to_string()))?;
    fs::write(path, raw)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_defaults_and_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"workingOffset": 3, "requestsFile": "requests.json"}"#,
        )
        .unwrap();
        let cfg = AppConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.working_offset, 3);
        assert_eq!(cfg.db_path, dir.path().join("db"));
        assert_eq!(
            cfg.requests_file.as_deref(),
            Some(dir.path().join("requests.json").as_path())
        );
        assert_eq!(cfg.chain_id, b'W');
    }

    #[test]
    fn test_missing_config_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.http_bind, "0.0.0.0:6890");
        assert_eq!(cfg.header_window, 100);
    }

    #[test]
    fn test_request_list_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.json");
        let address = Address::from_str(
            "0x0149a41d4f2a5a7c6e5ddd2bd0e0f6c742e9f9a9b8c7d6e5f403",
        )
        .unwrap();
        let request = serde_json::json!({"expr": "height > 0"});
        save_request_list(&path, vec![(address.clone(), request.clone())])
            .unwrap();
        let loaded = load_request_list(&path).unwrap();
        assert_eq!(loaded, vec![(address, request)]);
    }
}
