//! Core types and configuration for strata.
//!
//! This crate defines the `strata.toml` schema ([`StrataConfig`]), the
//! dependency manifest ([`Manifest`]), application object references
//! ([`AppRef`]), content digests, the image record, and shared error types.

pub mod app_ref;
pub mod config;
pub mod digest;
pub mod error;
pub mod image;
pub mod manifest;

pub use app_ref::AppRef;
pub use config::{BuildConfig, LaunchConfig, ProjectConfig, RuntimeConfig, StrataConfig};
pub use digest::{Digest, DigestBuilder};
pub use error::{Error, Result};
pub use image::{ImageConfig, ImageRecord, LayerKind, LayerRef};
pub use manifest::{Manifest, Requirement, normalize_name};
