// error.rs — Error type shared by every installation path.
//
// Hook bodies never return these: a detour that hits a problem delegates
// to the original function instead. Errors only surface from install/scan
// code, where the lifecycle layer logs them and disables the feature.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("module {0} is not loaded")]
    ModuleNotLoaded(String),

    #[error("invalid signature token '{token}' in {name}")]
    InvalidSignature { name: String, token: String },

    #[error("signature {0} is empty")]
    EmptySignature(String),

    #[error("pattern {name} not found in {module}")]
    PatternNotFound { name: String, module: String },

    #[error("{name} found at {found:#X}, expected {expected:#X}")]
    AddressMismatch {
        name: String,
        found: usize,
        expected: usize,
    },

    #[error("{call} failed with MinHook status {status}")]
    MinHook { call: &'static str, status: i32 },

    #[error("target {0:#X} is already hooked")]
    AlreadyHooked(usize),

    #[error("{call} failed with HRESULT {hr:#010X}")]
    Direct3D { call: &'static str, hr: u32 },

    #[error("could not create window: error {0}")]
    Window(u32),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("config parse: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
