//! Image build pipeline: dedup records, registry lookups, checkout,
//! build descriptors, build contexts

pub mod archive;
pub mod builder;
pub mod git;
pub mod lock;
pub mod registry;
pub mod templates;

pub use builder::{BuildStatus, ImageBuildOptions, ImageBuilder};
