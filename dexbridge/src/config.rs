use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const COMPILE_PATH_ENV: &str = "DEXBRIDGE_COMPILE_PATH";

/// Process-wide staging settings, fixed before the first class is defined.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingConfig {
    #[serde(default)]
    pub compile_path: Option<PathBuf>,
}

impl StagingConfig {
    pub fn new(compile_path: impl Into<PathBuf>) -> Self {
        Self {
            compile_path: Some(compile_path.into()),
        }
    }

    pub fn unset() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let compile_path = std::env::var_os(COMPILE_PATH_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self { compile_path }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn compile_path(&self) -> Option<&Path> {
        self.compile_path.as_deref()
    }
}
