//! File-based checkpointer
//!
//! ```text
//! checkpoints/
//! ├── BuilderBot-1.json
//! ├── ExplorerBot-1.json
//! └── MinerBot-1.json[.zst]
//! ```
//!
//! Writes go to a temporary file that is renamed over the previous snapshot,
//! so a crash mid-write leaves the old snapshot intact.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{Checkpoint, Checkpointer};
use crate::error::ColonyError;

const EXTENSION: &str = ".json";
const COMPRESSED_EXTENSION: &str = ".json.zst";

/// Stores each agent's snapshot as `<dir>/<agent_id>.json[.zst]`
#[derive(Debug, Clone)]
pub struct FileCheckpointer {
    dir: PathBuf,
    compression: bool,
}

impl FileCheckpointer {
    pub fn new(dir: impl Into<PathBuf>, compression: bool) -> Self {
        Self {
            dir: dir.into(),
            compression,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Agent ids become file stems; bytes outside `[A-Za-z0-9_-]` are
    /// percent-encoded so distinct ids never share a file
    fn file_stem(agent_id: &str) -> String {
        let mut stem = String::with_capacity(agent_id.len());
        for byte in agent_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                stem.push(char::from(byte));
            } else {
                stem.push_str(&format!("%{byte:02X}"));
            }
        }
        stem
    }

    pub fn checkpoint_path(&self, agent_id: &str) -> PathBuf {
        let extension = if self.compression {
            COMPRESSED_EXTENSION
        } else {
            EXTENSION
        };
        self.dir
            .join(format!("{}{}", Self::file_stem(agent_id), extension))
    }

    fn temp_path(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("{}.tmp", Self::file_stem(agent_id)))
    }

    async fn ensure_dir(&self) -> Result<(), ColonyError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ColonyError::checkpoint(format!("Failed to create directory: {}", e)))
    }

    fn compress(data: &[u8]) -> Result<Vec<u8>, ColonyError> {
        let mut encoder = zstd::stream::Encoder::new(Vec::new(), 3)
            .map_err(|e| ColonyError::checkpoint(format!("Compression init failed: {}", e)))?;
        encoder
            .write_all(data)
            .map_err(|e| ColonyError::checkpoint(format!("Compression write failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| ColonyError::checkpoint(format!("Compression finish failed: {}", e)))
    }

    /// Inverse of [`Self::file_stem`]; `None` for names it never produces
    fn agent_id_of(stem: &str) -> Option<String> {
        let mut bytes = Vec::with_capacity(stem.len());
        let mut rest = stem.as_bytes();
        while let Some((&byte, tail)) = rest.split_first() {
            if byte == b'%' {
                let hex = std::str::from_utf8(tail.get(..2)?).ok()?;
                bytes.push(u8::from_str_radix(hex, 16).ok()?);
                rest = &tail[2..];
            } else {
                bytes.push(byte);
                rest = tail;
            }
        }
        String::from_utf8(bytes).ok()
    }

    fn id_of(path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        let stem = name
            .strip_suffix(COMPRESSED_EXTENSION)
            .or_else(|| name.strip_suffix(EXTENSION))?;
        Self::agent_id_of(stem)
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), ColonyError> {
        self.ensure_dir().await?;

        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| ColonyError::checkpoint(format!("Serialization failed: {}", e)))?;
        let data = if self.compression {
            Self::compress(&json)?
        } else {
            json
        };

        let temp_path = self.temp_path(&checkpoint.agent_id);
        let final_path = self.checkpoint_path(&checkpoint.agent_id);

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| ColonyError::checkpoint(format!("Failed to create temp file: {}", e)))?;
        file.write_all(&data)
            .await
            .map_err(|e| ColonyError::checkpoint(format!("Failed to write data: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| ColonyError::checkpoint(format!("Failed to sync file: {}", e)))?;

        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| ColonyError::checkpoint(format!("Failed to rename file: {}", e)))?;

        Ok(())
    }

    async fn load(&self, agent_id: &str) -> Result<Option<Checkpoint>, ColonyError> {
        let path = self.checkpoint_path(agent_id);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ColonyError::checkpoint(format!("Failed to read file: {}", e)));
            }
        };

        let json = if self.compression {
            zstd::stream::decode_all(data.as_slice())
                .map_err(|e| ColonyError::corruption(agent_id, format!("Decompression failed: {}", e)))?
        } else {
            data
        };

        let checkpoint: Checkpoint = serde_json::from_slice(&json)
            .map_err(|e| ColonyError::corruption(agent_id, e.to_string()))?;
        Ok(Some(checkpoint))
    }

    async fn delete(&self, agent_id: &str) -> Result<(), ColonyError> {
        match fs::remove_file(self.checkpoint_path(agent_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ColonyError::checkpoint(format!("Failed to delete file: {}", e))),
        }
    }

    async fn list(&self) -> Result<Vec<String>, ColonyError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ColonyError::checkpoint(format!("Failed to read directory: {}", e)));
            }
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ColonyError::checkpoint(format!("Failed to read entry: {}", e)))?
        {
            if let Some(id) = Self::id_of(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
