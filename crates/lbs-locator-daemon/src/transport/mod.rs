//! Stdio observation feed.

pub mod framing;
pub mod stdio;

pub use framing::FeedMessage;
pub use stdio::StdioTransport;
