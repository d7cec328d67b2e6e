use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dex_format::{Dialect, OPTIMIZED_HEADER_LEN, OPTIMIZED_MAGIC};
use tracing::debug;
use uuid::Uuid;

use crate::container::{ClassDef, FieldDef, MethodDef};
use crate::logging::Category;
use crate::wire::{ValidationError, WireError, decode_container};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LoadFlags(u32);

impl LoadFlags {
    pub const NONE: LoadFlags = LoadFlags(0);

    pub fn from_bits(bits: u32) -> Self {
        LoadFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

#[derive(Debug)]
pub enum LoadError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Decode {
        path: PathBuf,
        source: WireError,
    },
    Validation {
        path: PathBuf,
        source: ValidationError,
    },
    InvalidOptimizedHeader(PathBuf),
    Rejected(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io { path, source } => {
                write!(f, "load i/o failure at '{}': {source}", path.display())
            }
            LoadError::Decode { path, source } => {
                write!(f, "invalid container '{}': {source}", path.display())
            }
            LoadError::Validation { path, source } => {
                write!(f, "container '{}' failed verification: {source}", path.display())
            }
            LoadError::InvalidOptimizedHeader(path) => {
                write!(f, "invalid optimized artifact header in '{}'", path.display())
            }
            LoadError::Rejected(message) => {
                write!(f, "platform loader rejected container: {message}")
            }
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io { source, .. } => Some(source),
            LoadError::Decode { source, .. } => Some(source),
            LoadError::Validation { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Capability identifying the class loader that resolved classes belong to.
/// Supplied by the caller; the pipeline never creates one.
pub trait LoaderContext: Send + Sync {
    fn loader_name(&self) -> &str;
}

#[derive(Clone, Debug)]
pub struct DynamicLoaderContext {
    name: String,
}

impl DynamicLoaderContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl LoaderContext for DynamicLoaderContext {
    fn loader_name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassObject {
    pub name: String,
    pub internal_name: String,
    pub descriptor: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub access_flags: u32,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
    pub source_file: Option<String>,
    pub defining_loader: String,
    pub image_id: Uuid,
    pub image_path: PathBuf,
}

impl ClassObject {
    pub fn from_def(
        def: &ClassDef,
        context: &dyn LoaderContext,
        image_id: Uuid,
        image_path: &Path,
    ) -> Self {
        let internal_name = def.internal_name().to_string();
        Self {
            name: internal_name.replace('/', "."),
            internal_name,
            descriptor: def.descriptor.clone(),
            superclass: def.superclass.as_deref().map(dotted_name),
            interfaces: def.interfaces.iter().map(|name| dotted_name(name)).collect(),
            access_flags: def.access_flags,
            fields: def.fields.clone(),
            methods: def.methods.clone(),
            source_file: def.source_file.clone(),
            defining_loader: context.loader_name().to_string(),
            image_id,
            image_path: image_path.to_path_buf(),
        }
    }

    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }
}

fn dotted_name(descriptor: &str) -> String {
    descriptor
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
        .unwrap_or(descriptor)
        .replace('/', ".")
}

/// Live executable image produced by a [`PlatformLoader`].
pub trait LoadedImage: Send + Sync {
    fn resolve(&self, internal_name: &str, context: &dyn LoaderContext)
    -> Option<Arc<ClassObject>>;

    fn path(&self) -> &Path;
}

pub trait PlatformLoader: Send + Sync {
    fn load(
        &self,
        raw_path: &Path,
        optimized_path: &Path,
        flags: LoadFlags,
    ) -> Result<Box<dyn LoadedImage>, LoadError>;
}

/// Loader for containers written by this crate. It verifies the raw container,
/// writes the optimized artifact (header plus the container bytes unchanged) and
/// serves classes from the optimized file.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContainerLoader;

impl PlatformLoader for ContainerLoader {
    fn load(
        &self,
        raw_path: &Path,
        optimized_path: &Path,
        flags: LoadFlags,
    ) -> Result<Box<dyn LoadedImage>, LoadError> {
        let raw = fs::read(raw_path).map_err(|source| LoadError::Io {
            path: raw_path.to_path_buf(),
            source,
        })?;
        verify(raw_path, &raw)?;

        write_optimized(optimized_path, &raw, flags)?;

        let optimized = fs::read(optimized_path).map_err(|source| LoadError::Io {
            path: optimized_path.to_path_buf(),
            source,
        })?;
        let container = optimized_payload(optimized_path, &optimized)?;
        let (dialect, classes) = verify(optimized_path, container)?;

        let image = ContainerImage::new(optimized_path.to_path_buf(), dialect, classes);
        debug!(
            "{} opened image {} from {} ({} classes)",
            Category::Load,
            image.id(),
            optimized_path.display(),
            image.len()
        );
        Ok(Box::new(image))
    }
}

fn verify(path: &Path, bytes: &[u8]) -> Result<(Dialect, Vec<ClassDef>), LoadError> {
    let raw = decode_container(bytes).map_err(|source| LoadError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let unit = raw.resolve().map_err(|source| LoadError::Validation {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((unit.dialect(), unit.into_classes()))
}

fn write_optimized(path: &Path, container: &[u8], flags: LoadFlags) -> Result<(), LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let length = u32::try_from(container.len())
        .map_err(|_| LoadError::Rejected(format!("container too large: {}", container.len())))?;

    let mut out = Vec::with_capacity(OPTIMIZED_HEADER_LEN + container.len());
    out.extend_from_slice(&OPTIMIZED_MAGIC);
    out.extend_from_slice(&(OPTIMIZED_HEADER_LEN as u32).to_le_bytes());
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&flags.bits().to_le_bytes());
    out.extend_from_slice(container);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(&out).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    Ok(())
}

fn optimized_payload<'a>(path: &Path, bytes: &'a [u8]) -> Result<&'a [u8], LoadError> {
    let invalid = || LoadError::InvalidOptimizedHeader(path.to_path_buf());
    if bytes.len() < OPTIMIZED_HEADER_LEN || bytes[..OPTIMIZED_MAGIC.len()] != OPTIMIZED_MAGIC {
        return Err(invalid());
    }
    let read_u32 = |at: usize| {
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[at..at + 4]);
        u32::from_le_bytes(word) as usize
    };
    let offset = read_u32(OPTIMIZED_MAGIC.len());
    let length = read_u32(OPTIMIZED_MAGIC.len() + 4);
    let end = offset.checked_add(length).ok_or_else(invalid)?;
    if offset < OPTIMIZED_HEADER_LEN || end != bytes.len() {
        return Err(invalid());
    }
    Ok(&bytes[offset..end])
}

pub struct ContainerImage {
    id: Uuid,
    path: PathBuf,
    dialect: Dialect,
    classes: HashMap<String, ClassDef>,
}

impl ContainerImage {
    fn new(path: PathBuf, dialect: Dialect, classes: Vec<ClassDef>) -> Self {
        let classes = classes
            .into_iter()
            .map(|class| (class.internal_name().to_string(), class))
            .collect();
        Self {
            id: Uuid::new_v4(),
            path,
            dialect,
            classes,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl LoadedImage for ContainerImage {
    fn resolve(
        &self,
        internal_name: &str,
        context: &dyn LoaderContext,
    ) -> Option<Arc<ClassObject>> {
        let def = self.classes.get(internal_name)?;
        Some(Arc::new(ClassObject::from_def(
            def, context, self.id, &self.path,
        )))
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
