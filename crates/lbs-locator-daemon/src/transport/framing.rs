//! Message framing for newline-delimited JSON.

use serde::Deserialize;

use lbs_locator::{LocatorEvent, RawEnvironment};

use crate::error::{DaemonError, DaemonResult};

/// One line of the input feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FeedMessage {
    /// `{"wlan_data_allowed": false}`
    WlanPermission { wlan_data_allowed: bool },
    /// `{"cells": [...], "wlan": [...], "carrier": {...}}`
    Environment(RawEnvironment),
}

/// Parse a single line of text as a feed message.
pub fn parse_message(line: &str) -> DaemonResult<FeedMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(DaemonError::ParseError("Empty message".to_string()));
    }

    serde_json::from_str(trimmed).map_err(|e| DaemonError::ParseError(e.to_string()))
}

/// Serialize an event to a JSON line (with trailing newline).
pub fn frame_event(event: &LocatorEvent) -> DaemonResult<String> {
    let mut json = serde_json::to_string(event)?;
    json.push('\n');
    Ok(json)
}
