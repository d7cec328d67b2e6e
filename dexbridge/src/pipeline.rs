use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classfile::ClassReader;
use crate::config::StagingConfig;
use crate::container::TranslationUnit;
use crate::error::DefineError;
use crate::loader::{ClassObject, LoadFlags, LoaderContext, PlatformLoader};
use crate::logging::Category;
use crate::resolve::resolve_class;
use crate::staging::{StagedArtifact, StagingError, StagingWriter};
use crate::translate::{ClassTranslator, TranslationError, TranslatorAdapter};

#[derive(Clone, Debug)]
pub struct ClassDefinitionRequest {
    pub qualified_name: String,
    pub bytecode: Arc<[u8]>,
    /// Opaque form the class was compiled from; only used for diagnostics.
    pub source_form: Option<String>,
}

impl ClassDefinitionRequest {
    pub fn new(qualified_name: impl Into<String>, bytecode: impl Into<Arc<[u8]>>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            bytecode: bytecode.into(),
            source_form: None,
        }
    }

    pub fn with_source_form(mut self, source_form: impl Into<String>) -> Self {
        self.source_form = Some(source_form.into());
        self
    }
}

/// Defines classes compiled for the source VM by routing them through the
/// target VM's file-based loader.
///
/// Each call owns its container and staged files, so one bridge can be shared
/// across threads. Staged files are left in the compile path after the call.
pub struct ClassBridge {
    config: StagingConfig,
    translator: TranslatorAdapter,
    loader: Arc<dyn PlatformLoader>,
}

impl ClassBridge {
    pub fn new(config: StagingConfig, loader: Arc<dyn PlatformLoader>) -> Self {
        Self {
            config,
            translator: TranslatorAdapter::default(),
            loader,
        }
    }

    pub fn with_translator(mut self, translator: Box<dyn ClassTranslator>) -> Self {
        self.translator = TranslatorAdapter::new(translator);
        self
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    pub fn define_missing_class(
        &self,
        qualified_name: &str,
        bytecode: &[u8],
        source_form: Option<&str>,
        context: &dyn LoaderContext,
    ) -> Result<Arc<ClassObject>, DefineError> {
        let mut request = ClassDefinitionRequest::new(qualified_name, bytecode);
        request.source_form = source_form.map(str::to_string);
        self.define_class(request, context)
    }

    pub fn define_class(
        &self,
        request: ClassDefinitionRequest,
        context: &dyn LoaderContext,
    ) -> Result<Arc<ClassObject>, DefineError> {
        let result = self.run(&request, context);
        match &result {
            Ok(class) => info!(
                "{} defined {} in loader {} from {}",
                Category::Define,
                class.name,
                class.defining_loader,
                class.image_path.display()
            ),
            Err(err) => warn!(
                "{} failed to define class {} (source form: {}): {err}",
                Category::Define,
                request.qualified_name,
                request.source_form.as_deref().unwrap_or("<none>")
            ),
        }
        result
    }

    fn run(
        &self,
        request: &ClassDefinitionRequest,
        context: &dyn LoaderContext,
    ) -> Result<Arc<ClassObject>, DefineError> {
        let name = request.qualified_name.as_str();
        let staging_err = |source: StagingError| DefineError::Staging {
            class: name.to_string(),
            source,
        };
        let translation_err = |source: TranslationError| DefineError::Translation {
            class: name.to_string(),
            source,
        };

        let writer = StagingWriter::from_config(&self.config).map_err(staging_err)?;

        let reader = ClassReader::new(name, request.bytecode.clone());
        let record = self.translator.translate(&reader).map_err(translation_err)?;
        let mut unit = TranslationUnit::new(self.translator.dialect());
        unit.add(record)
            .map_err(|err| translation_err(err.into()))?;

        let StagedArtifact {
            raw_path,
            optimized_path,
        } = writer.stage(&unit).map_err(staging_err)?;

        let image = self
            .loader
            .load(&raw_path, &optimized_path, LoadFlags::NONE)
            .map_err(|source| DefineError::Load {
                class: name.to_string(),
                source,
            })?;
        debug!(
            "{} loaded {} via {}",
            Category::Load,
            raw_path.display(),
            optimized_path.display()
        );

        Ok(resolve_class(image.as_ref(), name, context)?)
    }
}
