use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid bind address {value:?}: {reason}")]
    InvalidBind { value: String, reason: String },

    // ── Dependency manifest ──
    #[error("failed to read manifest {path}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid manifest entry at line {line}: {reason}")]
    ManifestParse { line: usize, reason: String },

    // ── Application object reference ──
    #[error("invalid application reference {value:?}: {reason} (expected `module:object`)")]
    InvalidAppRef { value: String, reason: &'static str },

    // ── Image record ──
    #[error("no image found at {path} — run `strata build` first")]
    ImageMissing { path: PathBuf },

    #[error("failed to read image record {path}")]
    ImageRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write image record {path}")]
    ImageWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("image record {path} is corrupt")]
    ImageDecode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode image record")]
    ImageEncode { source: serde_json::Error },
}
