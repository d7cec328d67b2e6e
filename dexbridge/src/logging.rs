use std::fmt;
use std::sync::OnceLock;

use owo_colors::OwoColorize;
use supports_color::Stream;
use tracing_subscriber::EnvFilter;

static ANSI_ENABLED: OnceLock<bool> = OnceLock::new();

pub const DEFAULT_DIRECTIVE: &str = "info";

/// Installs a compact stderr subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_DIRECTIVE`].
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    init_with_default(DEFAULT_DIRECTIVE)
}

pub fn init_with_default(directive: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directive)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi_enabled())
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

/// Pipeline stage a log line belongs to. Renders as a bold label when the
/// terminal takes colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Define,
    Stage,
    Load,
}

impl Category {
    pub fn name(self) -> &'static str {
        match self {
            Category::Define => "DEFINE",
            Category::Stage => "STAGE",
            Category::Load => "LOAD",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        if !ansi_enabled() {
            return f.write_str(name);
        }
        match self {
            Category::Define => write!(f, "{}", name.bright_green().bold()),
            Category::Stage => write!(f, "{}", name.bright_cyan().bold()),
            Category::Load => write!(f, "{}", name.bright_magenta().bold()),
        }
    }
}

fn ansi_enabled() -> bool {
    *ANSI_ENABLED.get_or_init(detect_ansi)
}

/// Colour preference taken from `NO_COLOR` and `FORCE_COLOR`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ColorPolicy {
    Never,
    Always,
    Auto,
}

impl ColorPolicy {
    fn from_env() -> Self {
        Self::from_flags(
            std::env::var_os("NO_COLOR").is_some(),
            std::env::var_os("FORCE_COLOR").is_some(),
        )
    }

    // NO_COLOR wins over FORCE_COLOR
    fn from_flags(no_color: bool, force_color: bool) -> Self {
        match (no_color, force_color) {
            (true, _) => ColorPolicy::Never,
            (false, true) => ColorPolicy::Always,
            (false, false) => ColorPolicy::Auto,
        }
    }
}

fn detect_ansi() -> bool {
    match ColorPolicy::from_env() {
        ColorPolicy::Never => false,
        ColorPolicy::Always => {
            enable_virtual_terminal();
            true
        }
        ColorPolicy::Auto => {
            enable_virtual_terminal() || supports_color::on_cached(Stream::Stderr).is_some()
        }
    }
}

/// Turns on escape sequence processing for a stderr console. Returns whether
/// the console accepted it.
#[cfg(windows)]
fn enable_virtual_terminal() -> bool {
    use windows::Win32::System::Console::{
        CONSOLE_MODE, ENABLE_VIRTUAL_TERMINAL_PROCESSING, GetConsoleMode, GetStdHandle,
        STD_ERROR_HANDLE, SetConsoleMode,
    };

    // SAFETY: the handle comes from GetStdHandle and is only passed to console mode calls.
    unsafe {
        let Ok(handle) = GetStdHandle(STD_ERROR_HANDLE) else {
            return false;
        };
        if handle.is_invalid() {
            return false;
        }
        let mut mode = CONSOLE_MODE::default();
        GetConsoleMode(handle, &mut mode).is_ok()
            && SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING).is_ok()
    }
}

#[cfg(not(windows))]
fn enable_virtual_terminal() -> bool {
    false
}
