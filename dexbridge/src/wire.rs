use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use dex_format::{
    CONTAINER_FLAGS, CONTAINER_MAGIC_PREFIX, Dialect, HEADER_LEN, MAGIC_LEN, NO_INDEX,
    SIGNATURE_LEN,
};
use sha1::{Digest, Sha1};

use crate::container::{ClassDef, CodeItem, FieldDef, MethodDef, TranslationUnit};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    UnexpectedEof,
    InvalidMagic([u8; 4]),
    UnsupportedDialect([u8; 4]),
    UnsupportedFlags(u16),
    FileSizeMismatch { declared: u32, actual: usize },
    SignatureMismatch,
    InvalidCodeFlag(u8),
    InvalidUtf8,
    LengthTooLarge(&'static str, usize),
    TrailingBytes,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::UnexpectedEof => write!(f, "unexpected end of input"),
            WireError::InvalidMagic(found) => write!(f, "invalid magic: {found:?}"),
            WireError::UnsupportedDialect(version) => {
                write!(f, "unsupported container dialect: {version:?}")
            }
            WireError::UnsupportedFlags(flags) => write!(f, "unsupported flags: {flags}"),
            WireError::FileSizeMismatch { declared, actual } => write!(
                f,
                "declared file size {declared} does not match actual size {actual}"
            ),
            WireError::SignatureMismatch => write!(f, "container signature mismatch"),
            WireError::InvalidCodeFlag(value) => write!(f, "invalid code flag: {value}"),
            WireError::InvalidUtf8 => write!(f, "invalid utf-8 string"),
            WireError::LengthTooLarge(field, len) => {
                write!(f, "{field} length too large: {len}")
            }
            WireError::TrailingBytes => write!(f, "trailing bytes after container payload"),
        }
    }
}

impl std::error::Error for WireError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidStringIndex { context: &'static str, index: u32 },
    InvalidTypeIndex { context: &'static str, index: u32 },
    MalformedTypeDescriptor(String),
    NonClassType { context: &'static str, descriptor: String },
    DuplicateClass(String),
    InvalidRegisterCount {
        method: String,
        ins_size: u16,
        registers_size: u16,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidStringIndex { context, index } => {
                write!(f, "invalid string index {index} in {context}")
            }
            ValidationError::InvalidTypeIndex { context, index } => {
                write!(f, "invalid type index {index} in {context}")
            }
            ValidationError::MalformedTypeDescriptor(descriptor) => {
                write!(f, "malformed type descriptor '{descriptor}'")
            }
            ValidationError::NonClassType {
                context,
                descriptor,
            } => write!(f, "{context} must be a class type, found '{descriptor}'"),
            ValidationError::DuplicateClass(descriptor) => {
                write!(f, "class {descriptor} is defined more than once")
            }
            ValidationError::InvalidRegisterCount {
                method,
                ins_size,
                registers_size,
            } => write!(
                f,
                "method {method} declares {ins_size} ins but only {registers_size} registers"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawField {
    pub name_idx: u32,
    pub type_idx: u32,
    pub access_flags: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMethod {
    pub name_idx: u32,
    pub proto_idx: u32,
    pub access_flags: u32,
    pub code: Option<CodeItem>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawClassDef {
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: u32,
    pub interfaces: Vec<u32>,
    pub source_file_idx: u32,
    pub fields: Vec<RawField>,
    pub methods: Vec<RawMethod>,
}

/// Index-level view of a decoded container, before validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawContainer {
    pub dialect: Dialect,
    pub strings: Vec<String>,
    pub types: Vec<u32>,
    pub classes: Vec<RawClassDef>,
}

pub fn encode_container(unit: &TranslationUnit) -> Result<Vec<u8>, WireError> {
    let mut pools = Pools::default();
    let mut classes = Vec::with_capacity(unit.len());
    for class in unit.classes() {
        classes.push(pools.intern_class(class));
    }

    let mut body = Vec::new();
    write_u32_count("strings", pools.strings.len(), &mut body)?;
    for value in &pools.strings {
        write_string("string", value, &mut body)?;
    }
    write_u32_count("types", pools.types.len(), &mut body)?;
    for string_idx in &pools.types {
        body.extend_from_slice(&string_idx.to_le_bytes());
    }
    write_u32_count("classes", classes.len(), &mut body)?;
    for class in &classes {
        write_class(class, &mut body)?;
    }

    let file_size = HEADER_LEN + body.len();
    let file_size_u32 =
        u32::try_from(file_size).map_err(|_| WireError::LengthTooLarge("file", file_size))?;

    let mut signed = Vec::with_capacity(file_size - MAGIC_LEN - SIGNATURE_LEN);
    signed.extend_from_slice(&file_size_u32.to_le_bytes());
    signed.extend_from_slice(&CONTAINER_FLAGS.to_le_bytes());
    signed.extend_from_slice(&body);

    let mut out = Vec::with_capacity(file_size);
    out.extend_from_slice(&unit.dialect().magic());
    out.extend_from_slice(&Sha1::digest(&signed));
    out.extend_from_slice(&signed);
    Ok(out)
}

pub fn decode_container(bytes: &[u8]) -> Result<RawContainer, WireError> {
    let mut cursor = Cursor::new(bytes);

    let magic = cursor.read_exact_array::<4>()?;
    if magic != CONTAINER_MAGIC_PREFIX {
        return Err(WireError::InvalidMagic(magic));
    }
    let version = cursor.read_exact_array::<4>()?;
    let dialect =
        Dialect::from_version_bytes(version).ok_or(WireError::UnsupportedDialect(version))?;

    let signature = cursor.read_exact_array::<SIGNATURE_LEN>()?;
    let declared_size = cursor.read_u32()?;
    if declared_size as usize != bytes.len() {
        return Err(WireError::FileSizeMismatch {
            declared: declared_size,
            actual: bytes.len(),
        });
    }
    let signed = &bytes[MAGIC_LEN + SIGNATURE_LEN..];
    if Sha1::digest(signed).as_slice() != signature.as_slice() {
        return Err(WireError::SignatureMismatch);
    }

    let flags = cursor.read_u16()?;
    if flags != CONTAINER_FLAGS {
        return Err(WireError::UnsupportedFlags(flags));
    }

    let string_count = cursor.read_u32()? as usize;
    let mut strings = Vec::with_capacity(string_count.min(bytes.len()));
    for _ in 0..string_count {
        strings.push(cursor.read_string()?);
    }

    let type_count = cursor.read_u32()? as usize;
    let mut types = Vec::with_capacity(type_count.min(bytes.len()));
    for _ in 0..type_count {
        types.push(cursor.read_u32()?);
    }

    let class_count = cursor.read_u32()? as usize;
    let mut classes = Vec::with_capacity(class_count.min(bytes.len()));
    for _ in 0..class_count {
        classes.push(read_class(&mut cursor)?);
    }

    if !cursor.is_eof() {
        return Err(WireError::TrailingBytes);
    }

    Ok(RawContainer {
        dialect,
        strings,
        types,
        classes,
    })
}

pub fn validate_container(container: &RawContainer) -> Result<(), ValidationError> {
    container.resolve().map(|_| ())
}

impl RawContainer {
    /// Validates every index and rebuilds the class records.
    pub fn resolve(&self) -> Result<TranslationUnit, ValidationError> {
        for string_idx in &self.types {
            let descriptor = self.string("type table", *string_idx)?;
            if !is_type_descriptor(descriptor) {
                return Err(ValidationError::MalformedTypeDescriptor(
                    descriptor.to_string(),
                ));
            }
        }

        let mut seen = HashSet::new();
        let mut unit = TranslationUnit::new(self.dialect);
        for raw in &self.classes {
            let descriptor = self.class_type("class", raw.class_idx)?;
            if !seen.insert(descriptor.to_string()) {
                return Err(ValidationError::DuplicateClass(descriptor.to_string()));
            }

            let superclass = if raw.superclass_idx == NO_INDEX {
                None
            } else {
                Some(self.class_type("superclass", raw.superclass_idx)?.to_string())
            };
            let interfaces = raw
                .interfaces
                .iter()
                .map(|idx| self.class_type("interface", *idx).map(str::to_string))
                .collect::<Result<Vec<_>, _>>()?;
            let source_file = if raw.source_file_idx == NO_INDEX {
                None
            } else {
                Some(self.string("source file", raw.source_file_idx)?.to_string())
            };

            let mut fields = Vec::with_capacity(raw.fields.len());
            for field in &raw.fields {
                fields.push(FieldDef {
                    name: self.string("field name", field.name_idx)?.to_string(),
                    type_descriptor: self
                        .type_descriptor("field type", field.type_idx)?
                        .to_string(),
                    access_flags: field.access_flags,
                });
            }

            let mut methods = Vec::with_capacity(raw.methods.len());
            for method in &raw.methods {
                let name = self.string("method name", method.name_idx)?.to_string();
                if let Some(code) = &method.code
                    && code.ins_size > code.registers_size
                {
                    return Err(ValidationError::InvalidRegisterCount {
                        method: format!("{descriptor}->{name}"),
                        ins_size: code.ins_size,
                        registers_size: code.registers_size,
                    });
                }
                methods.push(MethodDef {
                    name,
                    proto: self.string("method proto", method.proto_idx)?.to_string(),
                    access_flags: method.access_flags,
                    code: method.code.clone(),
                });
            }

            let class = ClassDef {
                descriptor: descriptor.to_string(),
                access_flags: raw.access_flags,
                superclass,
                interfaces,
                source_file,
                fields,
                methods,
            };
            unit.add(class)
                .map_err(|_| ValidationError::DuplicateClass(descriptor.to_string()))?;
        }
        Ok(unit)
    }

    fn string(&self, context: &'static str, index: u32) -> Result<&str, ValidationError> {
        self.strings
            .get(index as usize)
            .map(String::as_str)
            .ok_or(ValidationError::InvalidStringIndex { context, index })
    }

    fn type_descriptor(&self, context: &'static str, index: u32) -> Result<&str, ValidationError> {
        let string_idx = self
            .types
            .get(index as usize)
            .ok_or(ValidationError::InvalidTypeIndex { context, index })?;
        self.string(context, *string_idx)
    }

    fn class_type(&self, context: &'static str, index: u32) -> Result<&str, ValidationError> {
        let descriptor = self.type_descriptor(context, index)?;
        if !descriptor.starts_with('L') {
            return Err(ValidationError::NonClassType {
                context,
                descriptor: descriptor.to_string(),
            });
        }
        Ok(descriptor)
    }
}

/// Accepts primitive, class and array type descriptors.
pub fn is_type_descriptor(descriptor: &str) -> bool {
    let trimmed = descriptor.trim_start_matches('[');
    let dims = descriptor.len() - trimmed.len();
    if dims > 255 {
        return false;
    }
    match trimmed.as_bytes() {
        [b'V'] => dims == 0,
        [b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D'] => true,
        [b'L', inner @ .., b';'] => {
            !inner.is_empty()
                && !inner.contains(&b';')
                && !inner.contains(&b'.')
                && !inner.starts_with(b"/")
                && !inner.ends_with(b"/")
        }
        _ => false,
    }
}

pub fn describe_container(bytes: &[u8]) -> Result<String, WireError> {
    let container = decode_container(bytes)?;
    Ok(describe_raw_container(&container))
}

pub fn describe_raw_container(container: &RawContainer) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "dialect: {}", container.dialect);
    let _ = writeln!(&mut out, "strings ({}):", container.strings.len());
    for (index, value) in container.strings.iter().enumerate() {
        let _ = writeln!(&mut out, "  [{index:04}] {value:?}");
    }
    let _ = writeln!(&mut out, "types ({}):", container.types.len());
    for (index, string_idx) in container.types.iter().enumerate() {
        let text = lookup(container, *string_idx);
        let _ = writeln!(&mut out, "  [{index:04}] {text}");
    }
    let _ = writeln!(&mut out, "classes ({}):", container.classes.len());
    for class in &container.classes {
        let descriptor = type_text(container, class.class_idx);
        let superclass = type_text(container, class.superclass_idx);
        let _ = writeln!(
            &mut out,
            "  class {descriptor} access={:#06x} super={superclass}",
            class.access_flags
        );
        for interface in &class.interfaces {
            let _ = writeln!(&mut out, "    implements {}", type_text(container, *interface));
        }
        for field in &class.fields {
            let _ = writeln!(
                &mut out,
                "    field {}:{} access={:#06x}",
                lookup(container, field.name_idx),
                type_text(container, field.type_idx),
                field.access_flags
            );
        }
        for method in &class.methods {
            let code = match &method.code {
                Some(code) => format!(
                    "regs={} ins={} outs={} insns={}",
                    code.registers_size,
                    code.ins_size,
                    code.outs_size,
                    code.insns.len()
                ),
                None => "no code".to_string(),
            };
            let _ = writeln!(
                &mut out,
                "    method {}{} access={:#06x} {code}",
                lookup(container, method.name_idx),
                lookup(container, method.proto_idx),
                method.access_flags
            );
        }
    }
    out
}

fn lookup(container: &RawContainer, index: u32) -> String {
    if index == NO_INDEX {
        return "<none>".to_string();
    }
    container
        .strings
        .get(index as usize)
        .cloned()
        .unwrap_or_else(|| format!("<bad string {index}>"))
}

fn type_text(container: &RawContainer, index: u32) -> String {
    if index == NO_INDEX {
        return "<none>".to_string();
    }
    match container.types.get(index as usize) {
        Some(string_idx) => lookup(container, *string_idx),
        None => format!("<bad type {index}>"),
    }
}

#[derive(Default)]
struct Pools {
    strings: Vec<String>,
    string_index: HashMap<String, u32>,
    types: Vec<u32>,
    type_index: HashMap<u32, u32>,
}

impl Pools {
    fn string(&mut self, value: &str) -> u32 {
        if let Some(index) = self.string_index.get(value) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.string_index.insert(value.to_string(), index);
        index
    }

    fn type_id(&mut self, descriptor: &str) -> u32 {
        let string_idx = self.string(descriptor);
        if let Some(index) = self.type_index.get(&string_idx) {
            return *index;
        }
        let index = self.types.len() as u32;
        self.types.push(string_idx);
        self.type_index.insert(string_idx, index);
        index
    }

    fn intern_class(&mut self, class: &ClassDef) -> RawClassDef {
        let class_idx = self.type_id(&class.descriptor);
        let superclass_idx = match &class.superclass {
            Some(superclass) => self.type_id(superclass),
            None => NO_INDEX,
        };
        let interfaces = class
            .interfaces
            .iter()
            .map(|interface| self.type_id(interface))
            .collect();
        let source_file_idx = match &class.source_file {
            Some(source_file) => self.string(source_file),
            None => NO_INDEX,
        };
        let fields = class
            .fields
            .iter()
            .map(|field| RawField {
                name_idx: self.string(&field.name),
                type_idx: self.type_id(&field.type_descriptor),
                access_flags: field.access_flags,
            })
            .collect();
        let methods = class
            .methods
            .iter()
            .map(|method| RawMethod {
                name_idx: self.string(&method.name),
                proto_idx: self.string(&method.proto),
                access_flags: method.access_flags,
                code: method.code.clone(),
            })
            .collect();
        RawClassDef {
            class_idx,
            access_flags: class.access_flags,
            superclass_idx,
            interfaces,
            source_file_idx,
            fields,
            methods,
        }
    }
}

fn write_class(class: &RawClassDef, out: &mut Vec<u8>) -> Result<(), WireError> {
    out.extend_from_slice(&class.class_idx.to_le_bytes());
    out.extend_from_slice(&class.access_flags.to_le_bytes());
    out.extend_from_slice(&class.superclass_idx.to_le_bytes());
    write_u32_count("interfaces", class.interfaces.len(), out)?;
    for interface in &class.interfaces {
        out.extend_from_slice(&interface.to_le_bytes());
    }
    out.extend_from_slice(&class.source_file_idx.to_le_bytes());

    write_u32_count("fields", class.fields.len(), out)?;
    for field in &class.fields {
        out.extend_from_slice(&field.name_idx.to_le_bytes());
        out.extend_from_slice(&field.type_idx.to_le_bytes());
        out.extend_from_slice(&field.access_flags.to_le_bytes());
    }

    write_u32_count("methods", class.methods.len(), out)?;
    for method in &class.methods {
        out.extend_from_slice(&method.name_idx.to_le_bytes());
        out.extend_from_slice(&method.proto_idx.to_le_bytes());
        out.extend_from_slice(&method.access_flags.to_le_bytes());
        match &method.code {
            None => out.push(0),
            Some(code) => {
                out.push(1);
                out.extend_from_slice(&code.registers_size.to_le_bytes());
                out.extend_from_slice(&code.ins_size.to_le_bytes());
                out.extend_from_slice(&code.outs_size.to_le_bytes());
                out.extend_from_slice(&code.tries_size.to_le_bytes());
                write_u32_len("insns", code.insns.len(), out)?;
                out.extend_from_slice(&code.insns);
            }
        }
    }
    Ok(())
}

fn read_class(cursor: &mut Cursor<'_>) -> Result<RawClassDef, WireError> {
    let class_idx = cursor.read_u32()?;
    let access_flags = cursor.read_u32()?;
    let superclass_idx = cursor.read_u32()?;
    let interface_count = cursor.read_u32()? as usize;
    let mut interfaces = Vec::with_capacity(interface_count.min(cursor.remaining()));
    for _ in 0..interface_count {
        interfaces.push(cursor.read_u32()?);
    }
    let source_file_idx = cursor.read_u32()?;

    let field_count = cursor.read_u32()? as usize;
    let mut fields = Vec::with_capacity(field_count.min(cursor.remaining()));
    for _ in 0..field_count {
        fields.push(RawField {
            name_idx: cursor.read_u32()?,
            type_idx: cursor.read_u32()?,
            access_flags: cursor.read_u32()?,
        });
    }

    let method_count = cursor.read_u32()? as usize;
    let mut methods = Vec::with_capacity(method_count.min(cursor.remaining()));
    for _ in 0..method_count {
        let name_idx = cursor.read_u32()?;
        let proto_idx = cursor.read_u32()?;
        let access_flags = cursor.read_u32()?;
        let code = match cursor.read_u8()? {
            0 => None,
            1 => {
                let registers_size = cursor.read_u16()?;
                let ins_size = cursor.read_u16()?;
                let outs_size = cursor.read_u16()?;
                let tries_size = cursor.read_u16()?;
                let insns_len = cursor.read_u32()? as usize;
                let insns = cursor.read_exact(insns_len)?.to_vec();
                Some(CodeItem {
                    registers_size,
                    ins_size,
                    outs_size,
                    tries_size,
                    insns,
                })
            }
            other => return Err(WireError::InvalidCodeFlag(other)),
        };
        methods.push(RawMethod {
            name_idx,
            proto_idx,
            access_flags,
            code,
        });
    }

    Ok(RawClassDef {
        class_idx,
        access_flags,
        superclass_idx,
        interfaces,
        source_file_idx,
        fields,
        methods,
    })
}

fn write_string(field: &'static str, value: &str, out: &mut Vec<u8>) -> Result<(), WireError> {
    write_u32_len(field, value.len(), out)?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn write_u32_len(field: &'static str, len: usize, out: &mut Vec<u8>) -> Result<(), WireError> {
    let len_u32 = u32::try_from(len).map_err(|_| WireError::LengthTooLarge(field, len))?;
    out.extend_from_slice(&len_u32.to_le_bytes());
    Ok(())
}

fn write_u32_count(field: &'static str, count: usize, out: &mut Vec<u8>) -> Result<(), WireError> {
    write_u32_len(field, count, out)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        let value = self
            .bytes
            .get(self.offset)
            .ok_or(WireError::UnexpectedEof)?;
        self.offset += 1;
        Ok(*value)
    }

    fn read_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.read_exact_array::<2>()?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn read_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.read_exact_array::<4>()?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_exact(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    fn read_exact_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let bytes = self.read_exact(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(WireError::UnexpectedEof)?;
        if end > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn is_eof(&self) -> bool {
        self.offset == self.bytes.len()
    }
}
