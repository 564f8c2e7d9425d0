//! The runtime image record.
//!
//! An image is the ordered list of committed layers plus the launch
//! configuration. It is written once, after the last layer commits, and is
//! never modified afterwards: a rebuild replaces the record as a whole.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::digest::{Digest, DigestBuilder};

/// Build steps, in pipeline order. Each produces exactly one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Pinned interpreter and a fresh environment
    Base,
    /// Packaging toolchain upgrade
    Toolchain,
    /// Installed manifest dependencies
    Dependencies,
    /// Application source tree
    Source,
}

impl LayerKind {
    pub const ALL: [LayerKind; 4] = [
        LayerKind::Base,
        LayerKind::Toolchain,
        LayerKind::Dependencies,
        LayerKind::Source,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Base => "base",
            LayerKind::Toolchain => "toolchain",
            LayerKind::Dependencies => "dependencies",
            LayerKind::Source => "source",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRef {
    pub kind: LayerKind,
    pub key: Digest,
}

/// How the image starts its serving process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Application directory inside the top layer
    pub workdir: String,
    /// Python environment directory inside the top layer
    pub env_dir: String,
    pub bind: String,
    pub app: String,
    pub process_manager: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub name: String,
    pub id: Digest,
    pub layers: Vec<LayerRef>,
    pub config: ImageConfig,
}

impl ImageRecord {
    /// File name inside the state directory.
    pub const FILE_NAME: &'static str = "image.json";

    /// Build a record; the id is derived from the layer keys and config.
    pub fn new(name: String, layers: Vec<LayerRef>, config: ImageConfig) -> Self {
        let id = Self::compute_id(&layers, &config);
        Self {
            name,
            id,
            layers,
            config,
        }
    }

    pub fn compute_id(layers: &[LayerRef], config: &ImageConfig) -> Digest {
        let mut builder = DigestBuilder::new("strata/image/v1");
        for layer in layers {
            builder.str(layer.kind.as_str()).str(layer.key.as_str());
        }
        builder
            .str(&config.workdir)
            .str(&config.env_dir)
            .str(&config.bind)
            .str(&config.app)
            .str(&config.process_manager)
            .str(&config.workers.map(|w| w.to_string()).unwrap_or_default());
        builder.finish()
    }

    /// The layer every other layer is overlaid beneath.
    pub fn top_layer(&self) -> Option<&LayerRef> {
        self.layers.last()
    }

    pub fn layer(&self, kind: LayerKind) -> Option<&LayerRef> {
        self.layers.iter().find(|l| l.kind == kind)
    }

    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(Self::FILE_NAME)
    }

    pub fn exists(state_dir: &Path) -> bool {
        Self::path(state_dir).exists()
    }

    pub fn load(state_dir: &Path) -> crate::Result<Self> {
        let path = Self::path(state_dir);
        if !path.exists() {
            return Err(crate::Error::ImageMissing { path });
        }
        let content = std::fs::read(&path).map_err(|e| crate::Error::ImageRead {
            path: path.clone(),
            source: e,
        })?;
        serde_json::from_slice(&content).map_err(|e| crate::Error::ImageDecode { path, source: e })
    }

    /// Write the record atomically: a temporary file renamed into place.
    pub fn save(&self, state_dir: &Path) -> crate::Result<PathBuf> {
        let path = Self::path(state_dir);
        let tmp = state_dir.join(format!(".{}.{}.tmp", Self::FILE_NAME, std::process::id()));

        let mut content =
            serde_json::to_vec_pretty(self).map_err(|e| crate::Error::ImageEncode { source: e })?;
        content.push(b'\n');

        std::fs::create_dir_all(state_dir).map_err(|e| crate::Error::ImageWrite {
            path: state_dir.to_path_buf(),
            source: e,
        })?;
        std::fs::write(&tmp, content).map_err(|e| crate::Error::ImageWrite {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| crate::Error::ImageWrite {
            path: path.clone(),
            source: e,
        })?;

        tracing::debug!(path = %path.display(), id = %self.id, "wrote image record");
        Ok(path)
    }
}
