#![allow(dead_code, unused_imports)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub use dexbridge::{
    ClassBridge, ClassObject, ContainerLoader, DefineError, DynamicLoaderContext, LoadError,
    LoadFlags, LoadedImage, LoaderContext, PlatformLoader, StagingConfig,
};

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;

#[derive(Clone, Debug)]
pub struct MethodSpec {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    /// (max_stack, max_locals, code)
    pub code: Option<(u16, u16, Vec<u8>)>,
}

/// Assembles class files for tests. Method bodies are opaque byte payloads.
#[derive(Clone, Debug)]
pub struct ClassFileBuilder {
    pub major: u16,
    pub access: u16,
    pub this_class: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<(u16, String, String)>,
    pub methods: Vec<MethodSpec>,
    pub source_file: Option<String>,
    pub long_constant: Option<i64>,
    pub invoke_dynamic: bool,
    /// Utf8 constants written verbatim, for modified utf-8 encodings.
    pub raw_utf8: Vec<Vec<u8>>,
}

impl ClassFileBuilder {
    pub fn new(internal_name: &str) -> Self {
        Self {
            major: 50,
            access: ACC_PUBLIC | ACC_SUPER,
            this_class: internal_name.to_string(),
            super_class: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
            long_constant: None,
            invoke_dynamic: false,
            raw_utf8: Vec::new(),
        }
    }

    pub fn field(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.fields
            .push((access, name.to_string(), descriptor.to_string()));
        self
    }

    pub fn method(mut self, access: u16, name: &str, descriptor: &str, code: &[u8]) -> Self {
        self.methods.push(MethodSpec {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: Some((2, 4, code.to_vec())),
        });
        self
    }

    pub fn abstract_method(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.methods.push(MethodSpec {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: None,
        });
        self
    }

    pub fn interface(mut self, name: &str) -> Self {
        self.interfaces.push(name.to_string());
        self
    }

    pub fn source_file(mut self, name: &str) -> Self {
        self.source_file = Some(name.to_string());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut pool = Pool::new();
        let this_idx = pool.class(&self.this_class);
        let super_idx = self
            .super_class
            .as_ref()
            .map(|name| pool.class(name))
            .unwrap_or(0);
        let interface_idx = self
            .interfaces
            .iter()
            .map(|name| pool.class(name))
            .collect::<Vec<_>>();
        let fields = self
            .fields
            .iter()
            .map(|(access, name, descriptor)| (*access, pool.utf8(name), pool.utf8(descriptor)))
            .collect::<Vec<_>>();
        let code_name = pool.utf8("Code");
        let methods = self
            .methods
            .iter()
            .map(|method| {
                (
                    method.access,
                    pool.utf8(&method.name),
                    pool.utf8(&method.descriptor),
                    method.code.clone(),
                )
            })
            .collect::<Vec<_>>();
        let source_file = self
            .source_file
            .as_ref()
            .map(|name| (pool.utf8("SourceFile"), pool.utf8(name)));
        if let Some(value) = self.long_constant {
            pool.long(value);
        }
        for raw in &self.raw_utf8 {
            pool.raw_utf8(raw);
        }
        if self.invoke_dynamic {
            let name_and_type = pool.name_and_type("run", "()V");
            pool.invoke_dynamic(name_and_type);
        }

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.major.to_be_bytes());
        out.extend_from_slice(&pool.next.to_be_bytes());
        out.extend_from_slice(&pool.bytes);
        out.extend_from_slice(&self.access.to_be_bytes());
        out.extend_from_slice(&this_idx.to_be_bytes());
        out.extend_from_slice(&super_idx.to_be_bytes());
        out.extend_from_slice(&(interface_idx.len() as u16).to_be_bytes());
        for index in interface_idx {
            out.extend_from_slice(&index.to_be_bytes());
        }

        out.extend_from_slice(&(fields.len() as u16).to_be_bytes());
        for (access, name, descriptor) in fields {
            out.extend_from_slice(&access.to_be_bytes());
            out.extend_from_slice(&name.to_be_bytes());
            out.extend_from_slice(&descriptor.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());
        }

        out.extend_from_slice(&(methods.len() as u16).to_be_bytes());
        for (access, name, descriptor, code) in methods {
            out.extend_from_slice(&access.to_be_bytes());
            out.extend_from_slice(&name.to_be_bytes());
            out.extend_from_slice(&descriptor.to_be_bytes());
            match code {
                None => out.extend_from_slice(&0u16.to_be_bytes()),
                Some((max_stack, max_locals, code)) => {
                    out.extend_from_slice(&1u16.to_be_bytes());
                    out.extend_from_slice(&code_name.to_be_bytes());
                    let len = 2 + 2 + 4 + code.len() + 2 + 2;
                    out.extend_from_slice(&(len as u32).to_be_bytes());
                    out.extend_from_slice(&max_stack.to_be_bytes());
                    out.extend_from_slice(&max_locals.to_be_bytes());
                    out.extend_from_slice(&(code.len() as u32).to_be_bytes());
                    out.extend_from_slice(&code);
                    out.extend_from_slice(&0u16.to_be_bytes());
                    out.extend_from_slice(&0u16.to_be_bytes());
                }
            }
        }

        match source_file {
            None => out.extend_from_slice(&0u16.to_be_bytes()),
            Some((attr_name, value)) => {
                out.extend_from_slice(&1u16.to_be_bytes());
                out.extend_from_slice(&attr_name.to_be_bytes());
                out.extend_from_slice(&2u32.to_be_bytes());
                out.extend_from_slice(&value.to_be_bytes());
            }
        }
        out
    }
}

struct Pool {
    bytes: Vec<u8>,
    next: u16,
    utf8: HashMap<String, u16>,
    classes: HashMap<String, u16>,
}

impl Pool {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            next: 1,
            utf8: HashMap::new(),
            classes: HashMap::new(),
        }
    }

    fn utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.utf8.get(value) {
            return *index;
        }
        let index = self.next;
        self.bytes.push(1);
        self.bytes
            .extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.bytes.extend_from_slice(value.as_bytes());
        self.next += 1;
        self.utf8.insert(value.to_string(), index);
        index
    }

    fn raw_utf8(&mut self, value: &[u8]) -> u16 {
        let index = self.next;
        self.bytes.push(1);
        self.bytes
            .extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.bytes.extend_from_slice(value);
        self.next += 1;
        index
    }

    fn class(&mut self, name: &str) -> u16 {
        if let Some(index) = self.classes.get(name) {
            return *index;
        }
        let name_idx = self.utf8(name);
        let index = self.next;
        self.bytes.push(7);
        self.bytes.extend_from_slice(&name_idx.to_be_bytes());
        self.next += 1;
        self.classes.insert(name.to_string(), index);
        index
    }

    fn long(&mut self, value: i64) -> u16 {
        let index = self.next;
        self.bytes.push(5);
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self.next += 2;
        index
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_idx = self.utf8(name);
        let descriptor_idx = self.utf8(descriptor);
        let index = self.next;
        self.bytes.push(12);
        self.bytes.extend_from_slice(&name_idx.to_be_bytes());
        self.bytes.extend_from_slice(&descriptor_idx.to_be_bytes());
        self.next += 1;
        index
    }

    fn invoke_dynamic(&mut self, name_and_type: u16) -> u16 {
        let index = self.next;
        self.bytes.push(18);
        self.bytes.extend_from_slice(&0u16.to_be_bytes());
        self.bytes.extend_from_slice(&name_and_type.to_be_bytes());
        self.next += 1;
        index
    }
}

/// `name` given in dotted form. Public class with a constructor, one static
/// method, one field and a source file attribute.
pub fn sample_class(name: &str) -> Vec<u8> {
    sample_builder(name).build()
}

pub fn sample_builder(name: &str) -> ClassFileBuilder {
    ClassFileBuilder::new(&name.replace('.', "/"))
        .field(ACC_PUBLIC, "count", "I")
        .method(ACC_PUBLIC, "<init>", "()V", &[0x2A, 0xB7, 0x00, 0x01, 0xB1])
        .method(ACC_PUBLIC | ACC_STATIC, "invoke", "(JLjava/lang/Object;)I", &[0x04, 0xAC])
        .source_file("gen.clj")
}

pub fn staged_file_names(dir: &Path) -> Vec<String> {
    let mut names = std::fs::read_dir(dir)
        .expect("read staging dir")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect::<Vec<_>>();
    names.sort();
    names
}

pub fn context() -> DynamicLoaderContext {
    DynamicLoaderContext::new("repl-loader")
}

/// Delegates to [`ContainerLoader`] and records every call.
#[derive(Default)]
pub struct RecordingLoader {
    pub calls: Mutex<Vec<(PathBuf, PathBuf, LoadFlags)>>,
}

impl RecordingLoader {
    pub fn calls(&self) -> Vec<(PathBuf, PathBuf, LoadFlags)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl PlatformLoader for RecordingLoader {
    fn load(
        &self,
        raw_path: &Path,
        optimized_path: &Path,
        flags: LoadFlags,
    ) -> Result<Box<dyn LoadedImage>, LoadError> {
        self.calls.lock().expect("calls lock").push((
            raw_path.to_path_buf(),
            optimized_path.to_path_buf(),
            flags,
        ));
        ContainerLoader.load(raw_path, optimized_path, flags)
    }
}

pub struct RejectingLoader;

impl PlatformLoader for RejectingLoader {
    fn load(
        &self,
        _raw_path: &Path,
        _optimized_path: &Path,
        _flags: LoadFlags,
    ) -> Result<Box<dyn LoadedImage>, LoadError> {
        Err(LoadError::Rejected("optimizer crashed".to_string()))
    }
}

/// Loads successfully but its image contains no classes.
pub struct EmptyImageLoader;

pub struct EmptyImage {
    path: PathBuf,
}

impl LoadedImage for EmptyImage {
    fn resolve(
        &self,
        _internal_name: &str,
        _context: &dyn LoaderContext,
    ) -> Option<Arc<ClassObject>> {
        None
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl PlatformLoader for EmptyImageLoader {
    fn load(
        &self,
        _raw_path: &Path,
        optimized_path: &Path,
        _flags: LoadFlags,
    ) -> Result<Box<dyn LoadedImage>, LoadError> {
        Ok(Box::new(EmptyImage {
            path: optimized_path.to_path_buf(),
        }))
    }
}
