use thiserror::Error;

/// Errors produced while loading or validating a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: expected `name = value`, got `{text}`")]
    Malformed { line: usize, text: String },

    #[error("line {line}: unknown configuration key `{key}`")]
    UnknownKey { line: usize, key: String },

    #[error("line {line}: invalid value `{value}` for `{key}`: {reason}")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
        reason: String,
    },

    #[error("filter_bits must be in range [5, 32], got {0}")]
    FilterBitsOutOfRange(u32),

    #[error("{key} must be at least {min}, got {got}")]
    BelowMinimum { key: &'static str, min: u64, got: u64 },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
