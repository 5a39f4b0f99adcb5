use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SplitError;
use crate::split::assigner::classify;
use crate::store;

/// Partition label of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "test" => Ok(Split::Test),
            other => Err(format!("unknown split '{other}'")),
        }
    }
}

/// Append-only map from recording name to split.
///
/// There is no way to overwrite or remove an entry through this type; a
/// reader of `split_map.json` therefore never sees an existing name move.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SplitAssignment(BTreeMap<String, Split>);

impl SplitAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Split> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Split)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Record `split` for `name` unless the name is already decided.
    /// Returns whether the entry was added.
    pub fn insert_new(&mut self, name: &str, split: Split) -> bool {
        if self.0.contains_key(name) {
            return false;
        }
        self.0.insert(name.to_string(), split);
        true
    }

    pub fn train_count(&self) -> usize {
        self.0.values().filter(|s| **s == Split::Train).count()
    }

    pub fn test_count(&self) -> usize {
        self.len() - self.train_count()
    }

    /// Fraction of all entries labelled train, or 0 for an empty store.
    pub fn train_fraction(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.train_count() as f64 / self.len() as f64
    }

    /// Load the store from `path`. A missing file yields an empty store.
    ///
    /// Entries whose value is not a valid split are re-derived with
    /// [`classify`] and reported in the returned list; everything else is
    /// kept verbatim.
    pub fn load_or_repair(
        path: &Path,
        train_ratio: f64,
    ) -> Result<(Self, Vec<String>), SplitError> {
        let raw: Option<serde_json::Value> = store::read_json(path)?;
        let Some(raw) = raw else {
            info!(path = %path.display(), "no split store yet, starting empty");
            return Ok((Self::new(), Vec::new()));
        };
        let serde_json::Value::Object(entries) = raw else {
            return Err(SplitError::NotAnObject {
                path: path.to_path_buf(),
            });
        };

        let mut map = BTreeMap::new();
        let mut repaired = Vec::new();
        for (name, value) in entries {
            let parsed = value.as_str().and_then(|s| s.parse::<Split>().ok());
            let split = match parsed {
                Some(split) => split,
                None => {
                    let split = classify(&name, train_ratio);
                    warn!(recording = %name, found = %value, repaired = %split, "repairing damaged split entry");
                    repaired.push(name.clone());
                    split
                }
            };
            map.insert(name, split);
        }
        Ok((SplitAssignment(map), repaired))
    }

    pub fn save(&self, path: &Path) -> Result<(), SplitError> {
        store::write_json(path, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_new_never_overwrites() {
        let mut a = SplitAssignment::new();
        assert!(a.insert_new("rec", Split::Train));
        assert!(!a.insert_new("rec", Split::Test));
        assert_eq!(a.get("rec"), Some(Split::Train));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split_map.json");
        let mut a = SplitAssignment::new();
        a.insert_new("b", Split::Test);
        a.insert_new("a", Split::Train);
        a.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\n  \"a\": \"train\",\n  \"b\": \"test\"\n}\n");

        let (loaded, repaired) = SplitAssignment::load_or_repair(&path, 0.9).unwrap();
        assert_eq!(loaded, a);
        assert!(repaired.is_empty());
    }

    #[test]
    fn test_missing_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (loaded, _) =
            SplitAssignment::load_or_repair(&dir.path().join("split_map.json"), 0.9).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_repairs_damaged_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split_map.json");
        std::fs::write(&path, r#"{"good": "test", "bad": "validation", "worse": 3}"#).unwrap();

        let (loaded, repaired) = SplitAssignment::load_or_repair(&path, 0.9).unwrap();
        assert_eq!(loaded.get("good"), Some(Split::Test));
        assert_eq!(loaded.get("bad"), Some(classify("bad", 0.9)));
        assert_eq!(loaded.get("worse"), Some(classify("worse", 0.9)));
        assert_eq!(repaired, vec!["bad".to_string(), "worse".to_string()]);
    }

    #[test]
    fn test_non_object_store_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split_map.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let err = SplitAssignment::load_or_repair(&path, 0.9).unwrap_err();
        assert!(matches!(err, SplitError::NotAnObject { .. }), "got: {err}");
    }

    #[test]
    fn test_split_parse_and_display() {
        assert_eq!("train".parse::<Split>().unwrap(), Split::Train);
        assert!("eval".parse::<Split>().is_err());
        assert_eq!(Split::Test.to_string(), "test");
    }
}
