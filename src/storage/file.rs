use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::error::{AppError, Context, Result};

use super::KeyValueStore;

/// Key-value store persisted as one pretty-printed JSON object on disk.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => {
                return Err(AppError::message(format!(
                    "Failed to read store file {}: {}",
                    self.path.display(),
                    err
                )))
            }
        };
        if data.trim().is_empty() {
            return Ok(Map::new());
        }

        let document: Value = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse store file {}", self.path.display()))?;
        match document {
            Value::Object(map) => Ok(map),
            _ => Err(AppError::message(format!(
                "Store file {} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create store directory {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(document).context("Failed to serialize store")?;
        let mut file = fs::File::create(&self.path)
            .with_context(|| format!("Failed to create store file {:?}", self.path))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write store file {:?}", self.path))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let document = self.read_document()?;
        Ok(keys
            .iter()
            .filter_map(|key| document.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect())
    }

    fn set(&self, entries: HashMap<String, Value>) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.read_document()?;
        document.extend(entries);
        self.write_document(&document)
    }
}
