//! Weft Config - Fabric configuration: types, loading, validation.
//!
//! Configuration errors are fatal at boot; a fabric never starts over a
//! config it could not fully validate.
//!
//! ```toml
//! [fabric]
//! workers = 4
//! shutdown_grace_ms = 5000
//!
//! [rings.low]
//! capacity = 65536
//! policy = "drop_newest"
//! quantum = 128
//!
//! [rings.bulk]
//! policy = "spill"
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod loader;
mod types;

pub use error::{ConfigError, ConfigResult};
pub use loader::load_config;
pub use types::{FabricSection, PolicyName, RingClassConfig, RingsSection, WeftConfig};
