//! Runtime info file: a small JSON document other local processes read to
//! find the running service.

use crate::schedule::lock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

pub const DEFAULT_FILE_NAME: &str = "cluster-scheduler-runtime.json";

#[derive(Debug, Error)]
pub enum RuntimeInfoError {
    #[error("IO error on runtime info file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed runtime info file {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub service_port: u16,
}

pub struct RuntimeInfoStore {
    path: PathBuf,
    info: Mutex<RuntimeInfo>,
}

impl RuntimeInfoStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            info: Mutex::new(RuntimeInfo::default()),
        }
    }

    /// Store backed by the well-known file in the system temp directory.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join(DEFAULT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn service_port(&self) -> u16 {
        lock(&self.info).service_port
    }

    pub fn set_service_port(&self, port: u16) {
        lock(&self.info).service_port = port;
    }

    pub fn snapshot(&self) -> RuntimeInfo {
        *lock(&self.info)
    }

    /// Replace the in-memory state with the file's content.
    pub fn load(&self) -> Result<RuntimeInfo, RuntimeInfoError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| RuntimeInfoError::Io {
            path: self.path.clone(),
            source,
        })?;
        let info: RuntimeInfo =
            serde_json::from_str(&content).map_err(|source| RuntimeInfoError::Json {
                path: self.path.clone(),
                source,
            })?;
        *lock(&self.info) = info;
        Ok(info)
    }

    /// Write the in-memory state to the file.
    pub fn synchronize(&self) -> Result<(), RuntimeInfoError> {
        let json = serde_json::to_string(&self.snapshot()).map_err(|source| {
            RuntimeInfoError::Json {
                path: self.path.clone(),
                source,
            }
        })?;
        std::fs::write(&self.path, json).map_err(|source| RuntimeInfoError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub fn remove_file(&self) -> Result<(), RuntimeInfoError> {
        std::fs::remove_file(&self.path).map_err(|source| RuntimeInfoError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
