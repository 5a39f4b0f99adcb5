//! Filesystem-backed JSON persistence shared by the split store, manifests and
//! the per-step metrics records.
//!
//! Every write goes to a sibling `.tmp` file first and is then renamed over the
//! destination, so a reader never observes a half-written document.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn replace_with(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp).map_err(write_err)?;
        file.write_all(bytes).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
    }
    fs::rename(&tmp, path).map_err(write_err)
}

/// Write `value` as pretty-printed JSON, replacing `path` atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    replace_with(path, &bytes)
}

/// Read a JSON document. Returns `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Write one compact JSON document per line, replacing `path` atomically.
/// Returns the number of rows written.
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<usize, StoreError> {
    let mut bytes = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut bytes, row)?;
        bytes.push(b'\n');
    }
    replace_with(path, &bytes)?;
    Ok(rows.len())
}

/// Read a JSONL file, one document per non-empty line.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let content = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|source| StoreError::Parse {
                path: path.to_path_buf(),
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_write_then_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), 2);
        map.insert("a".to_string(), 1);

        write_json(&path, &map).unwrap();
        let loaded: BTreeMap<String, i32> = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, map);
        assert!(!tmp_path(&path).exists(), "tmp file should be renamed away");
    }

    #[test]
    fn test_json_keys_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let value = serde_json::json!({"zeta": 1, "alpha": 2, "mid": 3});

        write_json(&path, &value).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let alpha = text.find("alpha").unwrap();
        let mid = text.find("mid").unwrap();
        let zeta = text.find("zeta").unwrap();
        assert!(alpha < mid && mid < zeta);
    }

    #[test]
    fn test_read_missing_json_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<BTreeMap<String, i32>> =
            read_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_read_corrupt_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        let err = read_json::<BTreeMap<String, i32>>(&path).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }), "got: {err}");
    }

    #[test]
    fn test_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        let rows = vec![serde_json::json!({"n": 1}), serde_json::json!({"n": 2})];

        assert_eq!(write_jsonl(&path, &rows).unwrap(), 2);
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\"n\":1}\n{\"n\":2}\n");

        let loaded: Vec<serde_json::Value> = read_jsonl(&path).unwrap();
        assert_eq!(loaded, rows);
    }
}
