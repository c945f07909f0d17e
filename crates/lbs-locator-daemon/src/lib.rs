//! lbs-locator daemon — radio observations in on stdin, position fixes out on stdout.

pub mod config;
pub mod error;
pub mod service;
pub mod transport;

pub use config::{build_config, Overrides};
pub use error::{DaemonError, DaemonResult};
pub use service::{LocatorService, StatusReport};
pub use transport::StdioTransport;
