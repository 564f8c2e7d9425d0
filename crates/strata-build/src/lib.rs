//! Layered build pipeline, layer store, and Dockerfile eject for strata.
//!
//! # Build pipeline
//!
//! ```text
//! strata build
//!   0. Manifest      ── parse requirements.txt (fail fast on bad lines)
//!   1. Base          ── check pinned interpreter, python -m venv env/
//!   2. Toolchain     ── pip install --no-cache-dir --upgrade pip
//!   3. Dependencies  ── pip install --no-cache-dir -r requirements.txt gunicorn
//!   4. Source        ── copy the project tree into app/
//!   5. Image record  ── .strata/image.json
//! ```
//!
//! # Layer keys
//!
//! Each key hashes the parent key together with the step's own inputs, so
//! editing source changes only the source key, while editing the manifest
//! changes the dependency key and, through the parent chain, the source key.
//!
//! # Source overlay
//!
//! The whole project tree is copied, hidden files included. Only the state
//! directory itself (`.strata/` by default) is left out.

pub mod dockerfile;
pub mod eject;
pub mod layer;
pub mod overlay;
pub mod pipeline;

pub use dockerfile::DockerfileGenerator;
pub use layer::{Acquired, LayerError, LayerStore, PruneReport, Staging};
pub use overlay::{OverlayError, SourceTree};
pub use pipeline::{BuildError, BuildOutcome, BuildPlan, Builder, StepReport};
