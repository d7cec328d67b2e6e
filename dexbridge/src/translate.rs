use dex_format::{ACC_ABSTRACT, ACC_CONSTRUCTOR, ACC_INTERFACE, ACC_NATIVE, ACC_STATIC, Dialect};

use crate::classfile::{ClassFileError, ClassReader, MemberInfo};
use crate::container::{ClassDef, CodeItem, ContainerError, FieldDef, MethodDef};
use crate::wire::is_type_descriptor;

/// Newest class-file major version the structural translator accepts.
pub const MAX_CLASS_MAJOR_VERSION: u16 = 52;
/// API level the adapter pins; newer dialects are rejected by some runtimes.
pub const PINNED_API_LEVEL: u32 = 13;

// ACC_SUPER shares its bit with ACC_SYNCHRONIZED and has no meaning in a container.
const ACC_SUPER: u32 = 0x0020;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TranslateOptions {
    /// Require the class file's own name to match the path it was read under.
    pub strict_name_check: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            strict_name_check: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DexOptions {
    pub target_api_level: u32,
}

impl DexOptions {
    pub fn dialect(&self) -> Dialect {
        Dialect::for_api_level(self.target_api_level)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    ClassFile(ClassFileError),
    UnsupportedClassVersion { major: u16, minor: u16 },
    NameMismatch { expected: String, found: String },
    UnsupportedFeature { feature: &'static str, dialect: Dialect },
    InvalidDescriptor { member: String, descriptor: String },
    MissingCode { method: String },
    Container(ContainerError),
}

impl std::fmt::Display for TranslationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslationError::ClassFile(err) => write!(f, "malformed class file: {err}"),
            TranslationError::UnsupportedClassVersion { major, minor } => write!(
                f,
                "unsupported class file version {major}.{minor} (max {MAX_CLASS_MAJOR_VERSION})"
            ),
            TranslationError::NameMismatch { expected, found } => write!(
                f,
                "class name {found} does not match file path {expected}.class"
            ),
            TranslationError::UnsupportedFeature { feature, dialect } => {
                write!(f, "{feature} is not supported by {dialect}")
            }
            TranslationError::InvalidDescriptor { member, descriptor } => {
                write!(f, "invalid descriptor '{descriptor}' on {member}")
            }
            TranslationError::MissingCode { method } => {
                write!(f, "concrete method {method} has no code")
            }
            TranslationError::Container(err) => write!(f, "rejected by container: {err}"),
        }
    }
}

impl std::error::Error for TranslationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TranslationError::ClassFile(err) => Some(err),
            TranslationError::Container(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ContainerError> for TranslationError {
    fn from(value: ContainerError) -> Self {
        TranslationError::Container(value)
    }
}

impl From<ClassFileError> for TranslationError {
    fn from(value: ClassFileError) -> Self {
        TranslationError::ClassFile(value)
    }
}

pub trait ClassTranslator: Send + Sync {
    fn translate(
        &self,
        reader: &ClassReader,
        options: &TranslateOptions,
        dex_options: &DexOptions,
    ) -> Result<ClassDef, TranslationError>;
}

/// Runs a [`ClassTranslator`] with the option set used for runtime-generated classes.
pub struct TranslatorAdapter {
    translator: Box<dyn ClassTranslator>,
    options: TranslateOptions,
    dex_options: DexOptions,
}

impl Default for TranslatorAdapter {
    fn default() -> Self {
        Self::new(Box::new(StructuralTranslator))
    }
}

impl TranslatorAdapter {
    pub fn new(translator: Box<dyn ClassTranslator>) -> Self {
        Self {
            translator,
            options: TranslateOptions {
                strict_name_check: false,
            },
            dex_options: DexOptions {
                target_api_level: PINNED_API_LEVEL,
            },
        }
    }

    pub fn options(&self) -> &TranslateOptions {
        &self.options
    }

    pub fn dex_options(&self) -> &DexOptions {
        &self.dex_options
    }

    pub fn dialect(&self) -> Dialect {
        self.dex_options.dialect()
    }

    pub fn translate(&self, reader: &ClassReader) -> Result<ClassDef, TranslationError> {
        self.translator
            .translate(reader, &self.options, &self.dex_options)
    }
}

/// Maps class-file structure onto a container record. Method bodies are carried
/// through unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralTranslator;

impl ClassTranslator for StructuralTranslator {
    fn translate(
        &self,
        reader: &ClassReader,
        options: &TranslateOptions,
        dex_options: &DexOptions,
    ) -> Result<ClassDef, TranslationError> {
        let class_file = reader.parse()?;
        if class_file.major_version > MAX_CLASS_MAJOR_VERSION {
            return Err(TranslationError::UnsupportedClassVersion {
                major: class_file.major_version,
                minor: class_file.minor_version,
            });
        }

        if options.strict_name_check && class_file.this_class != reader.expected_internal_name() {
            return Err(TranslationError::NameMismatch {
                expected: reader.expected_internal_name().to_string(),
                found: class_file.this_class.clone(),
            });
        }

        let dialect = dex_options.dialect();
        if !dialect.supports_invoke_dynamic()
            && class_file
                .constant_pool
                .entries()
                .any(|(_, constant)| constant.requires_invoke_dynamic())
        {
            return Err(TranslationError::UnsupportedFeature {
                feature: "invokedynamic",
                dialect,
            });
        }

        let class_access = u32::from(class_file.access_flags);
        let is_interface = class_access & ACC_INTERFACE != 0;
        let descriptor = format!("L{};", class_file.this_class);

        let mut fields = Vec::with_capacity(class_file.fields.len());
        for field in &class_file.fields {
            if field.descriptor == "V" || !is_type_descriptor(&field.descriptor) {
                return Err(TranslationError::InvalidDescriptor {
                    member: format!("{descriptor}->{}", field.name),
                    descriptor: field.descriptor.clone(),
                });
            }
            fields.push(FieldDef {
                name: field.name.clone(),
                type_descriptor: field.descriptor.clone(),
                access_flags: u32::from(field.access_flags),
            });
        }

        let mut methods = Vec::with_capacity(class_file.methods.len());
        for method in &class_file.methods {
            methods.push(translate_method(&descriptor, method, is_interface, dialect)?);
        }

        Ok(ClassDef {
            descriptor,
            access_flags: class_access & !ACC_SUPER,
            superclass: class_file
                .super_class
                .as_ref()
                .map(|name| format!("L{name};")),
            interfaces: class_file
                .interfaces
                .iter()
                .map(|name| format!("L{name};"))
                .collect(),
            source_file: class_file.source_file.clone(),
            fields,
            methods,
        })
    }
}

fn translate_method(
    class_descriptor: &str,
    method: &MemberInfo,
    is_interface: bool,
    dialect: Dialect,
) -> Result<MethodDef, TranslationError> {
    let member = format!("{class_descriptor}->{}", method.name);
    let parameter_registers =
        parameter_registers(&method.descriptor).ok_or_else(|| TranslationError::InvalidDescriptor {
            member: member.clone(),
            descriptor: method.descriptor.clone(),
        })?;

    let mut access_flags = u32::from(method.access_flags);
    let is_static = access_flags & ACC_STATIC != 0;
    let is_initializer = method.name == "<init>" || method.name == "<clinit>";
    if is_initializer {
        access_flags |= ACC_CONSTRUCTOR;
    }

    if is_interface
        && method.code.is_some()
        && method.name != "<clinit>"
        && !dialect.supports_default_methods()
    {
        return Err(TranslationError::UnsupportedFeature {
            feature: "interface method bodies",
            dialect,
        });
    }

    let code = match &method.code {
        Some(code) => {
            let ins_size = parameter_registers.saturating_add(u16::from(!is_static));
            let registers_size = code
                .max_locals
                .saturating_add(code.max_stack)
                .max(ins_size);
            Some(CodeItem {
                registers_size,
                ins_size,
                outs_size: code.max_stack,
                tries_size: code.exception_table_len,
                insns: code.code.clone(),
            })
        }
        None if access_flags & (ACC_ABSTRACT | ACC_NATIVE) == 0 => {
            return Err(TranslationError::MissingCode { method: member });
        }
        None => None,
    };

    Ok(MethodDef {
        name: method.name.clone(),
        proto: method.descriptor.clone(),
        access_flags,
        code,
    })
}

/// Registers taken by the declared parameters; `J` and `D` take two.
/// Returns `None` for a malformed method descriptor.
pub fn parameter_registers(descriptor: &str) -> Option<u16> {
    let rest = descriptor.strip_prefix('(')?;
    let (params, return_type) = rest.split_once(')')?;
    if !is_type_descriptor(return_type) {
        return None;
    }

    let bytes = params.as_bytes();
    let mut registers = 0u16;
    let mut pos = 0usize;
    while pos < bytes.len() {
        let start = pos;
        while pos < bytes.len() && bytes[pos] == b'[' {
            pos += 1;
        }
        let base = *bytes.get(pos)?;
        if !base.is_ascii() {
            return None;
        }
        if base == b'L' {
            let end = params[pos..].find(';')? + pos;
            pos = end + 1;
        } else {
            pos += 1;
        }
        let param = &params[start..pos];
        if param == "V" || !is_type_descriptor(param) {
            return None;
        }
        let width = if start == pos - 1 && matches!(base, b'J' | b'D') {
            2
        } else {
            1
        };
        registers = registers.checked_add(width)?;
    }
    Some(registers)
}
