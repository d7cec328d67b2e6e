pub mod classfile;
pub mod config;
pub mod container;
pub mod error;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod resolve;
pub mod staging;
pub mod translate;
pub mod wire;

pub use dex_format::Dialect;

pub use classfile::{
    ClassFile, ClassFileError, ClassReader, as_file_path, descriptor_for, internal_name,
};
pub use config::{COMPILE_PATH_ENV, StagingConfig};
pub use container::{ClassDef, CodeItem, ContainerError, FieldDef, MethodDef, TranslationUnit};
pub use error::DefineError;
pub use loader::{
    ClassObject, ContainerImage, ContainerLoader, DynamicLoaderContext, LoadError, LoadFlags,
    LoadedImage, LoaderContext, PlatformLoader,
};
pub use logging::init as init_logging;
pub use pipeline::{ClassBridge, ClassDefinitionRequest};
pub use resolve::{ResolutionError, resolve_class};
pub use staging::{StagedArtifact, StagingError, StagingWriter, derive_optimized_name};
pub use translate::{
    ClassTranslator, DexOptions, StructuralTranslator, TranslateOptions, TranslationError,
    TranslatorAdapter, parameter_registers,
};
pub use wire::{
    RawContainer, ValidationError, WireError, decode_container, describe_container,
    encode_container, validate_container,
};
