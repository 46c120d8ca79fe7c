//! Shared core for every `swarmd-*` crate: the data model, the common
//! error enum, and telemetry bootstrap.

pub mod error;
pub mod model;
pub mod telemetry;
pub mod transport;

pub use error::{Error, Result};
pub use transport::{ClusterView, Transport};
