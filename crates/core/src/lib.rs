//! `statekit-core`: foundation shared by the stream and store crates.
//!
//! This crate contains the error taxonomy, identifiers, the validating
//! [`Config`] reader and the JSON [`transform`] helpers. It has no notion of
//! streams or stores.

pub mod config;
pub mod error;
pub mod id;
pub mod transform;

pub use config::{Config, ConfigPath};
pub use error::{ConfigError, ConfigResult, StreamError, TransformError};
pub use id::StoreId;
pub use transform::{shallow_merge, transform, transform_rc};
