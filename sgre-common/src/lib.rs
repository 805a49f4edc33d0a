//! # SGRE Common Library
//!
//! Shared code for the Singapore real-estate pipeline stages:
//! - Error types
//! - Configuration loading
//! - Artifact store (parquet files tracked by a JSON ledger)
//! - Response cache for expensive or rate-limited calls
//! - Time helpers

pub mod cache;
pub mod config;
pub mod error;
pub mod store;
pub mod time;

pub use cache::{CacheManager, CacheStats};
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use store::{ArtifactMeta, ArtifactStore, Codec, SaveMode, SaveOptions, Tabular};
