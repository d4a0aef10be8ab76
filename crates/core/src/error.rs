//! Crate-wide error type
//!
//! Each subsystem owns its own error enum; [`DriftError`] wraps them so the
//! force loop can propagate any of them with `?`.

use thiserror::Error;

use crate::boundary::ShorelineError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::dataset::DatasetError;
use crate::geodesy::GeodesyError;

#[derive(Error, Debug)]
pub enum DriftError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("geodesy error: {0}")]
    Geodesy(#[from] GeodesyError),
    #[error("shoreline error: {0}")]
    Shoreline(#[from] ShorelineError),
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    /// A worker task panicked or its result channel closed
    #[error("worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, DriftError>;
