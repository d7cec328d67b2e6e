use std::sync::Arc;

const CLASS_MAGIC: u32 = 0xCAFE_BABE;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassFileError {
    UnexpectedEof { offset: usize },
    InvalidMagic(u32),
    InvalidConstantTag { index: u16, tag: u8 },
    InvalidConstantIndex(u16),
    UnexpectedConstant { index: u16, expected: &'static str },
    InvalidUtf8 { index: u16 },
    AttributeLengthMismatch { name: String, declared: u32 },
    TrailingBytes { offset: usize },
}

impl std::fmt::Display for ClassFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassFileError::UnexpectedEof { offset } => {
                write!(f, "unexpected end of class file at offset {offset}")
            }
            ClassFileError::InvalidMagic(found) => {
                write!(f, "invalid class file magic: {found:#010x}")
            }
            ClassFileError::InvalidConstantTag { index, tag } => {
                write!(f, "invalid constant pool tag {tag} at index {index}")
            }
            ClassFileError::InvalidConstantIndex(index) => {
                write!(f, "unresolvable constant pool index {index}")
            }
            ClassFileError::UnexpectedConstant { index, expected } => {
                write!(f, "constant pool index {index} is not a {expected} entry")
            }
            ClassFileError::InvalidUtf8 { index } => {
                write!(f, "invalid utf-8 in constant pool entry {index}")
            }
            ClassFileError::AttributeLengthMismatch { name, declared } => write!(
                f,
                "attribute '{name}' does not match its declared length {declared}"
            ),
            ClassFileError::TrailingBytes { offset } => {
                write!(f, "trailing bytes after class file at offset {offset}")
            }
        }
    }
}

impl std::error::Error for ClassFileError {}

/// Converts a dotted class name into the class-file path token, `a/b/C.class`.
pub fn as_file_path(qualified_name: &str) -> String {
    let mut path = internal_name(qualified_name);
    path.push_str(".class");
    path
}

pub fn internal_name(qualified_name: &str) -> String {
    qualified_name.replace('.', "/")
}

pub fn descriptor_for(qualified_name: &str) -> String {
    format!("L{};", internal_name(qualified_name))
}

/// Raw source bytecode framed with the file path token derived from its name.
#[derive(Clone, Debug)]
pub struct ClassReader {
    bytes: Arc<[u8]>,
    file_path: String,
}

impl ClassReader {
    pub fn new(qualified_name: &str, bytes: Arc<[u8]>) -> Self {
        Self {
            bytes,
            file_path: as_file_path(qualified_name),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Internal name implied by the file path, without the `.class` suffix.
    pub fn expected_internal_name(&self) -> &str {
        self.file_path
            .strip_suffix(".class")
            .unwrap_or(&self.file_path)
    }

    pub fn parse(&self) -> Result<ClassFile, ClassFileError> {
        ClassFile::parse(&self.bytes)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
    /// Second slot taken by a long or double.
    Unusable,
}

impl Constant {
    pub fn requires_invoke_dynamic(&self) -> bool {
        matches!(
            self,
            Constant::MethodHandle { .. }
                | Constant::MethodType { .. }
                | Constant::Dynamic { .. }
                | Constant::InvokeDynamic { .. }
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class { .. } => "Class",
            Constant::String { .. } => "String",
            Constant::FieldRef { .. } => "Fieldref",
            Constant::MethodRef { .. } => "Methodref",
            Constant::InterfaceMethodRef { .. } => "InterfaceMethodref",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType { .. } => "MethodType",
            Constant::Dynamic { .. } => "Dynamic",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
            Constant::Module { .. } => "Module",
            Constant::Package { .. } => "Package",
            Constant::Unusable => "unusable",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstantPool {
    // index 0 is never valid and holds `Unusable`
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Result<&Constant, ClassFileError> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(ClassFileError::InvalidConstantIndex(index)),
            Some(constant) => Ok(constant),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, constant)| !matches!(constant, Constant::Unusable))
            .map(|(index, constant)| (index as u16, constant))
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value),
            _ => Err(ClassFileError::UnexpectedConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => Err(ClassFileError::UnexpectedConstant {
                index,
                expected: "Class",
            }),
        }
    }

    fn check_references(&self) -> Result<(), ClassFileError> {
        for (_, constant) in self.entries() {
            let expect = |target: u16, expected: &'static str| -> Result<(), ClassFileError> {
                let found = self.get(target)?;
                if found.kind() != expected {
                    return Err(ClassFileError::UnexpectedConstant {
                        index: target,
                        expected,
                    });
                }
                Ok(())
            };
            match constant {
                Constant::Class { name_index }
                | Constant::Module { name_index }
                | Constant::Package { name_index } => expect(*name_index, "Utf8")?,
                Constant::String { string_index } => expect(*string_index, "Utf8")?,
                Constant::MethodType { descriptor_index } => expect(*descriptor_index, "Utf8")?,
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    expect(*name_index, "Utf8")?;
                    expect(*descriptor_index, "Utf8")?;
                }
                Constant::FieldRef {
                    class_index,
                    name_and_type_index,
                }
                | Constant::MethodRef {
                    class_index,
                    name_and_type_index,
                }
                | Constant::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    expect(*class_index, "Class")?;
                    expect(*name_and_type_index, "NameAndType")?;
                }
                Constant::Dynamic {
                    name_and_type_index,
                    ..
                }
                | Constant::InvokeDynamic {
                    name_and_type_index,
                    ..
                } => expect(*name_and_type_index, "NameAndType")?,
                Constant::MethodHandle {
                    reference_index, ..
                } => {
                    self.get(*reference_index)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table_len: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub code: Option<CodeAttribute>,
    pub attributes: Vec<Attribute>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub source_file: Option<String>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut cursor = Cursor::new(bytes);

        let magic = cursor.read_u32()?;
        if magic != CLASS_MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }
        let minor_version = cursor.read_u16()?;
        let major_version = cursor.read_u16()?;

        let constant_pool = read_constant_pool(&mut cursor)?;
        constant_pool.check_references()?;

        let access_flags = cursor.read_u16()?;
        let this_class = constant_pool
            .class_name(cursor.read_u16()?)?
            .to_string();
        let super_index = cursor.read_u16()?;
        let super_class = if super_index == 0 {
            None
        } else {
            Some(constant_pool.class_name(super_index)?.to_string())
        };

        let interface_count = cursor.read_u16()? as usize;
        let mut interfaces = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            interfaces.push(constant_pool.class_name(cursor.read_u16()?)?.to_string());
        }

        let fields = read_members(&mut cursor, &constant_pool)?;
        let methods = read_members(&mut cursor, &constant_pool)?;
        let attributes = read_attributes(&mut cursor, &constant_pool)?;

        let mut source_file = None;
        for attribute in &attributes {
            if attribute.name == "SourceFile" {
                let mut inner = Cursor::new(&attribute.data);
                let index = inner.read_u16()?;
                if !inner.is_eof() {
                    return Err(ClassFileError::AttributeLengthMismatch {
                        name: attribute.name.clone(),
                        declared: attribute.data.len() as u32,
                    });
                }
                source_file = Some(constant_pool.utf8(index)?.to_string());
            }
        }

        if !cursor.is_eof() {
            return Err(ClassFileError::TrailingBytes {
                offset: cursor.offset,
            });
        }

        Ok(ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            source_file,
            attributes,
        })
    }
}

fn read_constant_pool(cursor: &mut Cursor<'_>) -> Result<ConstantPool, ClassFileError> {
    let count = cursor.read_u16()?;
    let mut entries = Vec::with_capacity(count as usize);
    entries.push(Constant::Unusable);

    let mut index = 1u16;
    while index < count {
        let tag = cursor.read_u8()?;
        let constant = match tag {
            TAG_UTF8 => {
                let len = cursor.read_u16()? as usize;
                let raw = cursor.read_exact(len)?;
                // modified utf-8: `C0 80` for NUL, surrogate pairs above the BMP
                let text = cesu8::from_java_cesu8(raw)
                    .map_err(|_| ClassFileError::InvalidUtf8 { index })?;
                Constant::Utf8(text.into_owned())
            }
            TAG_INTEGER => Constant::Integer(cursor.read_u32()? as i32),
            TAG_FLOAT => Constant::Float(cursor.read_u32()?),
            TAG_LONG => Constant::Long(cursor.read_u64()? as i64),
            TAG_DOUBLE => Constant::Double(cursor.read_u64()?),
            TAG_CLASS => Constant::Class {
                name_index: cursor.read_u16()?,
            },
            TAG_STRING => Constant::String {
                string_index: cursor.read_u16()?,
            },
            TAG_FIELDREF => Constant::FieldRef {
                class_index: cursor.read_u16()?,
                name_and_type_index: cursor.read_u16()?,
            },
            TAG_METHODREF => Constant::MethodRef {
                class_index: cursor.read_u16()?,
                name_and_type_index: cursor.read_u16()?,
            },
            TAG_INTERFACE_METHODREF => Constant::InterfaceMethodRef {
                class_index: cursor.read_u16()?,
                name_and_type_index: cursor.read_u16()?,
            },
            TAG_NAME_AND_TYPE => Constant::NameAndType {
                name_index: cursor.read_u16()?,
                descriptor_index: cursor.read_u16()?,
            },
            TAG_METHOD_HANDLE => Constant::MethodHandle {
                kind: cursor.read_u8()?,
                reference_index: cursor.read_u16()?,
            },
            TAG_METHOD_TYPE => Constant::MethodType {
                descriptor_index: cursor.read_u16()?,
            },
            TAG_DYNAMIC => Constant::Dynamic {
                bootstrap_index: cursor.read_u16()?,
                name_and_type_index: cursor.read_u16()?,
            },
            TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap_index: cursor.read_u16()?,
                name_and_type_index: cursor.read_u16()?,
            },
            TAG_MODULE => Constant::Module {
                name_index: cursor.read_u16()?,
            },
            TAG_PACKAGE => Constant::Package {
                name_index: cursor.read_u16()?,
            },
            other => return Err(ClassFileError::InvalidConstantTag { index, tag: other }),
        };
        let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        entries.push(constant);
        if wide {
            // the unusable second slot must still lie inside the pool
            if count - index < 2 {
                return Err(ClassFileError::InvalidConstantIndex(index + 1));
            }
            entries.push(Constant::Unusable);
            index += 2;
        } else {
            index += 1;
        }
    }

    Ok(ConstantPool { entries })
}

fn read_members(
    cursor: &mut Cursor<'_>,
    pool: &ConstantPool,
) -> Result<Vec<MemberInfo>, ClassFileError> {
    let count = cursor.read_u16()? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let access_flags = cursor.read_u16()?;
        let name = pool.utf8(cursor.read_u16()?)?.to_string();
        let descriptor = pool.utf8(cursor.read_u16()?)?.to_string();
        let attributes = read_attributes(cursor, pool)?;
        let code = attributes
            .iter()
            .find(|attribute| attribute.name == "Code")
            .map(|attribute| read_code_attribute(attribute, pool))
            .transpose()?;
        members.push(MemberInfo {
            access_flags,
            name,
            descriptor,
            code,
            attributes,
        });
    }
    Ok(members)
}

fn read_attributes(
    cursor: &mut Cursor<'_>,
    pool: &ConstantPool,
) -> Result<Vec<Attribute>, ClassFileError> {
    let count = cursor.read_u16()? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let name = pool.utf8(cursor.read_u16()?)?.to_string();
        let len = cursor.read_u32()? as usize;
        let data = cursor.read_exact(len)?.to_vec();
        attributes.push(Attribute { name, data });
    }
    Ok(attributes)
}

fn read_code_attribute(
    attribute: &Attribute,
    pool: &ConstantPool,
) -> Result<CodeAttribute, ClassFileError> {
    let mut cursor = Cursor::new(&attribute.data);
    let max_stack = cursor.read_u16()?;
    let max_locals = cursor.read_u16()?;
    let code_len = cursor.read_u32()? as usize;
    let code = cursor.read_exact(code_len)?.to_vec();
    let exception_table_len = cursor.read_u16()?;
    cursor.read_exact(exception_table_len as usize * 8)?;
    read_attributes(&mut cursor, pool)?;
    if !cursor.is_eof() {
        return Err(ClassFileError::AttributeLengthMismatch {
            name: attribute.name.clone(),
            declared: attribute.data.len() as u32,
        });
    }
    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_table_len,
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, ClassFileError> {
        let value = *self.bytes.get(self.offset).ok_or(ClassFileError::UnexpectedEof {
            offset: self.offset,
        })?;
        self.offset += 1;
        Ok(value)
    }

    fn read_u16(&mut self) -> Result<u16, ClassFileError> {
        Ok(u16::from_be_bytes(self.read_exact_array::<2>()?))
    }

    fn read_u32(&mut self) -> Result<u32, ClassFileError> {
        Ok(u32::from_be_bytes(self.read_exact_array::<4>()?))
    }

    fn read_u64(&mut self) -> Result<u64, ClassFileError> {
        Ok(u64::from_be_bytes(self.read_exact_array::<8>()?))
    }

    fn read_exact_array<const N: usize>(&mut self) -> Result<[u8; N], ClassFileError> {
        let bytes = self.read_exact(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], ClassFileError> {
        let eof = ClassFileError::UnexpectedEof {
            offset: self.offset,
        };
        let end = self.offset.checked_add(len).ok_or(eof.clone())?;
        if end > self.bytes.len() {
            return Err(eof);
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn is_eof(&self) -> bool {
        self.offset == self.bytes.len()
    }
}
