use dex_format::Dialect;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub type_descriptor: String,
    pub access_flags: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeItem {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub tries_size: u16,
    /// Instruction payload, carried as produced by the translator.
    pub insns: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDef {
    pub name: String,
    pub proto: String,
    pub access_flags: u32,
    pub code: Option<CodeItem>,
}

/// One translated class record, ready to be placed in a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassDef {
    pub descriptor: String,
    pub access_flags: u32,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            access_flags: 0,
            superclass: None,
            interfaces: Vec::new(),
            source_file: None,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Slash-separated internal name, `a/b/C` for `La/b/C;`.
    pub fn internal_name(&self) -> &str {
        self.descriptor
            .strip_prefix('L')
            .and_then(|rest| rest.strip_suffix(';'))
            .unwrap_or(&self.descriptor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    DuplicateClass(String),
}

impl std::fmt::Display for ContainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerError::DuplicateClass(descriptor) => {
                write!(f, "class {descriptor} already added to container")
            }
        }
    }
}

impl std::error::Error for ContainerError {}

/// Target-format container being assembled. Classes serialize in insertion order.
#[derive(Clone, Debug)]
pub struct TranslationUnit {
    dialect: Dialect,
    classes: Vec<ClassDef>,
}

impl TranslationUnit {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            classes: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn add(&mut self, class: ClassDef) -> Result<(), ContainerError> {
        if self
            .classes
            .iter()
            .any(|existing| existing.descriptor == class.descriptor)
        {
            return Err(ContainerError::DuplicateClass(class.descriptor));
        }
        self.classes.push(class);
        Ok(())
    }

    pub fn classes(&self) -> &[ClassDef] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn into_classes(self) -> Vec<ClassDef> {
        self.classes
    }
}
