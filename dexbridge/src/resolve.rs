use std::path::PathBuf;
use std::sync::Arc;

use crate::classfile::internal_name;
use crate::loader::{ClassObject, LoadedImage, LoaderContext};

/// Failure to find the requested class in an image that loaded successfully.
/// Points at a translation or assembly bug, not at the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    ClassNotFound {
        name: String,
        internal_name: String,
        image: PathBuf,
    },
    NameMismatch {
        requested: String,
        resolved: String,
    },
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionError::ClassNotFound {
                name,
                internal_name,
                image,
            } => write!(
                f,
                "failed to load generated class {name} ({internal_name}) from '{}'",
                image.display()
            ),
            ResolutionError::NameMismatch {
                requested,
                resolved,
            } => write!(
                f,
                "requested class {requested} but image resolved {resolved}"
            ),
        }
    }
}

impl std::error::Error for ResolutionError {}

/// Finds `qualified_name` in `image` for the calling loader.
///
/// `NameMismatch` only fires for custom [`LoadedImage`] implementations;
/// `ContainerImage` keys classes by internal name and derives the object name from it.
pub fn resolve_class(
    image: &dyn LoadedImage,
    qualified_name: &str,
    context: &dyn LoaderContext,
) -> Result<Arc<ClassObject>, ResolutionError> {
    let internal_name = internal_name(qualified_name);
    let class = image
        .resolve(&internal_name, context)
        .ok_or_else(|| ResolutionError::ClassNotFound {
            name: qualified_name.to_string(),
            internal_name: internal_name.clone(),
            image: image.path().to_path_buf(),
        })?;
    if class.name != qualified_name {
        return Err(ResolutionError::NameMismatch {
            requested: qualified_name.to_string(),
            resolved: class.name.clone(),
        });
    }
    Ok(class)
}
