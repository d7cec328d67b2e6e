#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dialect {
    V035,
    V037,
    V038,
    V039,
}

pub const DIALECTS: [Dialect; 4] = [Dialect::V035, Dialect::V037, Dialect::V038, Dialect::V039];

/// First four bytes of every container; bytes 4..8 carry the dialect.
pub const CONTAINER_MAGIC_PREFIX: [u8; 4] = *b"dex\n";
pub const OPTIMIZED_MAGIC: [u8; 8] = *b"dey\n036\0";

pub const MAGIC_LEN: usize = 8;
pub const SIGNATURE_LEN: usize = 20;
/// magic + signature + file_size + flags
pub const HEADER_LEN: usize = MAGIC_LEN + SIGNATURE_LEN + 4 + 2;
pub const OPTIMIZED_HEADER_LEN: usize = MAGIC_LEN + 4 + 4 + 4;

pub const NO_INDEX: u32 = u32::MAX;
pub const CONTAINER_FLAGS: u16 = 0;

pub const ACC_PUBLIC: u32 = 0x0001;
pub const ACC_PRIVATE: u32 = 0x0002;
pub const ACC_PROTECTED: u32 = 0x0004;
pub const ACC_STATIC: u32 = 0x0008;
pub const ACC_FINAL: u32 = 0x0010;
pub const ACC_SYNCHRONIZED: u32 = 0x0020;
pub const ACC_VOLATILE: u32 = 0x0040;
pub const ACC_BRIDGE: u32 = 0x0040;
pub const ACC_TRANSIENT: u32 = 0x0080;
pub const ACC_VARARGS: u32 = 0x0080;
pub const ACC_NATIVE: u32 = 0x0100;
pub const ACC_INTERFACE: u32 = 0x0200;
pub const ACC_ABSTRACT: u32 = 0x0400;
pub const ACC_STRICT: u32 = 0x0800;
pub const ACC_SYNTHETIC: u32 = 0x1000;
pub const ACC_ANNOTATION: u32 = 0x2000;
pub const ACC_ENUM: u32 = 0x4000;
pub const ACC_CONSTRUCTOR: u32 = 0x10000;

pub const RAW_FILE_PREFIX: &str = "repl-";
pub const OPTIMIZED_FILE_PREFIX: &str = "repl-opt-";
pub const CONTAINER_FILE_SUFFIX: &str = ".dex";

impl Dialect {
    /// Oldest dialect every deployed runtime accepts.
    pub const BASELINE: Dialect = Dialect::V035;

    pub fn version_bytes(self) -> [u8; 4] {
        match self {
            Dialect::V035 => *b"035\0",
            Dialect::V037 => *b"037\0",
            Dialect::V038 => *b"038\0",
            Dialect::V039 => *b"039\0",
        }
    }

    pub fn magic(self) -> [u8; 8] {
        let mut magic = [0u8; 8];
        magic[..4].copy_from_slice(&CONTAINER_MAGIC_PREFIX);
        magic[4..].copy_from_slice(&self.version_bytes());
        magic
    }

    pub fn from_version_bytes(bytes: [u8; 4]) -> Option<Self> {
        DIALECTS
            .into_iter()
            .find(|dialect| dialect.version_bytes() == bytes)
    }

    pub fn min_api_level(self) -> u32 {
        match self {
            Dialect::V035 => 1,
            Dialect::V037 => 24,
            Dialect::V038 => 26,
            Dialect::V039 => 28,
        }
    }

    pub fn for_api_level(api_level: u32) -> Self {
        DIALECTS
            .into_iter()
            .rev()
            .find(|dialect| api_level >= dialect.min_api_level())
            .unwrap_or(Dialect::BASELINE)
    }

    pub fn supports_default_methods(self) -> bool {
        self >= Dialect::V037
    }

    pub fn supports_invoke_dynamic(self) -> bool {
        self >= Dialect::V038
    }

    pub fn label(self) -> &'static str {
        match self {
            Dialect::V035 => "035",
            Dialect::V037 => "037",
            Dialect::V038 => "038",
            Dialect::V039 => "039",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dex {}", self.label())
    }
}
