use std::io::Write;
use std::path::{Path, PathBuf};

use dex_format::{CONTAINER_FILE_SUFFIX, OPTIMIZED_FILE_PREFIX, RAW_FILE_PREFIX};
use tracing::{Level, debug, enabled, trace};

use crate::config::StagingConfig;
use crate::container::TranslationUnit;
use crate::logging::Category;
use crate::wire::{WireError, describe_container, encode_container};

#[derive(Debug)]
pub enum StagingError {
    NotConfigured,
    Encode(WireError),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    InvalidFileName(PathBuf),
}

impl std::fmt::Display for StagingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StagingError::NotConfigured => write!(f, "staging directory is not configured"),
            StagingError::Encode(err) => write!(f, "failed to serialize container: {err}"),
            StagingError::Io { path, source } => {
                write!(f, "staging i/o failure at '{}': {source}", path.display())
            }
            StagingError::InvalidFileName(path) => {
                write!(f, "staged file has no usable name: '{}'", path.display())
            }
        }
    }
}

impl std::error::Error for StagingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StagingError::Encode(err) => Some(err),
            StagingError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Raw container file and the path the loader will write its optimized form to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedArtifact {
    pub raw_path: PathBuf,
    pub optimized_path: PathBuf,
}

/// Name of the optimized artifact for a raw staged file. Uniqueness comes from
/// the raw name.
pub fn derive_optimized_name(raw_name: &str) -> String {
    match raw_name.strip_prefix(RAW_FILE_PREFIX) {
        Some(rest) => format!("{OPTIMIZED_FILE_PREFIX}{rest}"),
        None => format!("{OPTIMIZED_FILE_PREFIX}{raw_name}"),
    }
}

#[derive(Clone, Debug)]
pub struct StagingWriter {
    root: PathBuf,
}

impl StagingWriter {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StagingError> {
        let root = root.as_ref();
        let root = std::path::absolute(root).map_err(|source| StagingError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn from_config(config: &StagingConfig) -> Result<Self, StagingError> {
        let root = config.compile_path().ok_or(StagingError::NotConfigured)?;
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage(&self, unit: &TranslationUnit) -> Result<StagedArtifact, StagingError> {
        let bytes = encode_container(unit).map_err(StagingError::Encode)?;
        if enabled!(Level::TRACE)
            && let Ok(dump) = describe_container(&bytes)
        {
            trace!("{} container layout:\n{dump}", Category::Stage);
        }

        let mut temp = tempfile::Builder::new()
            .prefix(RAW_FILE_PREFIX)
            .suffix(CONTAINER_FILE_SUFFIX)
            .tempfile_in(&self.root)
            .map_err(|source| StagingError::Io {
                path: self.root.clone(),
                source,
            })?;
        let temp_path = temp.path().to_path_buf();
        let io_err = |source| StagingError::Io {
            path: temp_path.clone(),
            source,
        };
        temp.write_all(&bytes).map_err(io_err)?;
        temp.flush().map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        let (_, raw_path) = temp.keep().map_err(|err| StagingError::Io {
            path: temp_path.clone(),
            source: err.error,
        })?;

        let raw_name = raw_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StagingError::InvalidFileName(raw_path.clone()))?;
        let optimized_path = self.root.join(derive_optimized_name(raw_name));

        debug!(
            "{} wrote {} bytes ({} classes) to {}",
            Category::Stage,
            bytes.len(),
            unit.len(),
            raw_path.display()
        );
        Ok(StagedArtifact {
            raw_path,
            optimized_path,
        })
    }
}
