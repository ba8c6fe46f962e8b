/// Tag settings persistence
///
/// The settings document is schema-free JSON shared by every profile page of
/// the UI. It is read on every GET and replaced wholesale on every POST.
/// Writes go straight to the target file; there is no temp-file rename, so a
/// crash mid-write can leave a truncated document behind.
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The persisted JSON blob
pub type Document = Value;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings file {path:?} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to access settings file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reads and writes `TagSettings.json`
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored document
    /// Returns an empty object if nothing has been saved yet
    pub fn load(&self) -> Result<Document, SettingsError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Value::Object(Map::new()));
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Overwrite the stored document, creating the data directory if needed
    pub fn save(&self, doc: &Document) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // Serializing a `Value` only fails inside the writer
        let json = serde_json::to_string_pretty(doc).map_err(|e| SettingsError::Io {
            path: self.path.clone(),
            source: io::Error::from(e),
        })?;

        fs::write(&self.path, json).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::debug!("Saved tag settings to {:?}", self.path);
        Ok(())
    }
}
