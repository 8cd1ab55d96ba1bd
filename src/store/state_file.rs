//! Watermark persistence in a flat `key=value` file.
//!
//! ```text
//! last_message_id=4711
//! ```
//!
//! Only `last_message_id` is interpreted. Other keys are kept as-is and
//! written back on every save. Writes go to `<path>.tmp` first and are
//! renamed over the real file, so a crash leaves either the old or the new
//! watermark on disk, never a torn one.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::StateError;
use crate::pipeline::types::Watermark;

/// Key holding the watermark.
pub const LAST_MESSAGE_ID_KEY: &str = "last_message_id";

/// Parsed contents of a state file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateFile {
    pub watermark: Watermark,
    /// Unknown keys, preserved across saves.
    pub extra: BTreeMap<String, String>,
}

impl StateFile {
    /// Parse file contents. `path` is only used in error messages.
    pub fn parse(path: &Path, contents: &str) -> Result<Self, StateError> {
        let mut state = Self::default();

        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            let malformed = || StateError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
                content: raw.to_string(),
            };

            let (key, value) = line.split_once('=').ok_or_else(malformed)?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() {
                return Err(malformed());
            }

            if key == LAST_MESSAGE_ID_KEY {
                let id = value.parse::<u64>().map_err(|_| malformed())?;
                state.watermark = Watermark::new(id);
            } else {
                state.extra.insert(key.to_string(), value.to_string());
            }
        }

        Ok(state)
    }

    /// Render back to the on-disk format.
    pub fn render(&self) -> String {
        let mut out = format!("{LAST_MESSAGE_ID_KEY}={}\n", self.watermark);
        for (key, value) in &self.extra {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }
}

/// Durable home of the watermark.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    extra: BTreeMap<String, String>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Read the persisted watermark. A missing file means first run (0).
    pub async fn load(&mut self) -> Result<Watermark, StateError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state file, starting from the beginning");
                return Ok(Watermark::default());
            }
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let state = StateFile::parse(&self.path, &contents)?;
        self.extra = state.extra;
        info!(
            path = %self.path.display(),
            watermark = state.watermark.get(),
            "Loaded state"
        );
        Ok(state.watermark)
    }

    /// Atomically replace the state file with `watermark`.
    pub async fn save(&self, watermark: Watermark) -> Result<(), StateError> {
        let state = StateFile {
            watermark,
            extra: self.extra.clone(),
        };
        let write_err = |source: std::io::Error| StateError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp_path = self.tmp_path();
        let mut file = fs::File::create(&tmp_path).await.map_err(write_err)?;
        file.write_all(state.render().as_bytes())
            .await
            .map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).await.map_err(write_err)?;

        debug!(watermark = watermark.get(), "State saved");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}
