use crate::loader::LoadError;
use crate::resolve::ResolutionError;
use crate::staging::StagingError;
use crate::translate::TranslationError;

/// Every way a class definition can fail. Exactly one is reported per call.
#[derive(Debug)]
pub enum DefineError {
    Translation {
        class: String,
        source: TranslationError,
    },
    Staging {
        class: String,
        source: StagingError,
    },
    Load {
        class: String,
        source: LoadError,
    },
    Resolution(ResolutionError),
}

impl DefineError {
    /// True when the failure points at this crate's own output rather than at
    /// the input bytes or the environment.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, DefineError::Resolution(_))
    }
}

impl std::fmt::Display for DefineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefineError::Translation { class, source } => {
                write!(f, "failed to translate class {class}: {source}")
            }
            DefineError::Staging { class, source } => {
                write!(f, "failed to stage class {class}: {source}")
            }
            DefineError::Load { class, source } => {
                write!(f, "failed to load class {class}: {source}")
            }
            DefineError::Resolution(source) => write!(f, "{source}"),
        }
    }
}

impl std::error::Error for DefineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DefineError::Translation { source, .. } => Some(source),
            DefineError::Staging { source, .. } => Some(source),
            DefineError::Load { source, .. } => Some(source),
            DefineError::Resolution(source) => Some(source),
        }
    }
}

impl From<ResolutionError> for DefineError {
    fn from(value: ResolutionError) -> Self {
        DefineError::Resolution(value)
    }
}
