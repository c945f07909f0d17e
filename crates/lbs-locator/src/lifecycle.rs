//! Single-flight request lifecycle.
//!
//! At most one lookup is outstanding. A request moves
//! `Idle -> Sending -> AwaitingResponse` and is resolved exactly once, either
//! by the transport completion or, after a timeout, by the cancelled
//! completion that follows it. The manual-timeout flag on the in-flight
//! request decides between `TimedOut` and a transport error, independent of
//! the order in which the two events arrive.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::payload::{is_key_rejected, parse_position, LookupRequest, QueryPayload};
use crate::snapshot::WifiObservation;
use crate::storage::{KeySource, SettingsStore};
use crate::transport::{TransportFailure, TransportReply};
use crate::types::{LocatorError, LocatorResult, Position};

pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const KEY_FAILURE_COOLDOWN: Duration = Duration::from_secs(12 * 60 * 60);
pub const KEY_FAILURE_TIME_KEY: &str = "/mlsprovider/keyfailure_time";

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Sending,
    AwaitingResponse,
}

#[derive(Debug)]
struct InFlightRequest {
    id: RequestId,
    state: RequestState,
    deadline: DateTime<Utc>,
    timed_out: bool,
}

/// A request ready to hand to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub id: RequestId,
    pub body: Vec<u8>,
    pub timeout: Duration,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    Issued(OutboundRequest),
    /// Another request is outstanding; nothing was sent.
    InFlight,
}

/// Terminal outcome of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Success(Position),
    ProtocolError(String),
    TransportError { message: String, key_rejected: bool },
    TimedOut,
}

impl Resolution {
    pub fn into_result(self) -> LocatorResult<Position> {
        match self {
            Resolution::Success(pos) => Ok(pos),
            Resolution::ProtocolError(msg) => Err(LocatorError::Protocol(msg)),
            Resolution::TransportError { message, .. } => Err(LocatorError::Transport(message)),
            Resolution::TimedOut => Err(LocatorError::TimedOut),
        }
    }
}

/// Time of the last key rejection, if one is recorded and readable.
pub fn key_failure_time(store: &dyn SettingsStore) -> LocatorResult<Option<DateTime<Utc>>> {
    Ok(store
        .get(KEY_FAILURE_TIME_KEY)?
        .and_then(|s| parse_timestamp(&s)))
}

pub fn clear_key_failure(store: &dyn SettingsStore) -> LocatorResult<()> {
    store.clear(KEY_FAILURE_TIME_KEY)
}

/// Whether a rejection at `failure` still blocks requests at `now`.
/// The window is half-open: `0 <= now - failure < 12h`.
pub fn in_key_cooldown(failure: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let diff_ms = (now - failure).num_milliseconds();
    diff_ms >= 0 && diff_ms < KEY_FAILURE_COOLDOWN.as_millis() as i64
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Owns the in-flight request and the key-failure marker policy.
pub struct RequestLifecycle {
    store: Arc<dyn SettingsStore>,
    keys: Arc<dyn KeySource>,
    in_flight: Option<InFlightRequest>,
    next_id: RequestId,
    timeout: Duration,
}

impl RequestLifecycle {
    pub fn new(store: Arc<dyn SettingsStore>, keys: Arc<dyn KeySource>) -> Self {
        Self::with_timeout(store, keys, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        store: Arc<dyn SettingsStore>,
        keys: Arc<dyn KeySource>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            in_flight: None,
            next_id: 1,
            timeout,
        }
    }

    pub fn state(&self) -> RequestState {
        self.in_flight
            .as_ref()
            .map_or(RequestState::Idle, |r| r.state)
    }

    pub fn in_flight_id(&self) -> Option<RequestId> {
        self.in_flight.as_ref().map(|r| r.id)
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.in_flight.as_ref().map(|r| r.deadline)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn active_key_failure(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match key_failure_time(self.store.as_ref()) {
            Ok(Some(failure)) if in_key_cooldown(failure, now) => Some(failure),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Failed to read key failure time: {e}");
                None
            }
        }
    }

    /// Prepare a lookup for `payload` and `wifi`.
    pub fn attempt(
        &mut self,
        payload: &QueryPayload,
        wifi: &[WifiObservation],
        now: DateTime<Utc>,
    ) -> LocatorResult<Attempt> {
        let key = self.keys.load().inspect_err(|e| {
            tracing::warn!("Unable to load lookup key: {e}");
        })?;

        if self.in_flight.is_some() {
            tracing::debug!("Previous request still in progress");
            return Ok(Attempt::InFlight);
        }

        if let Some(since) = self.active_key_failure(now) {
            tracing::debug!("Less than 12 hour old key failure, refusing a new try");
            return Err(LocatorError::KeyRejected {
                since: since.to_rfc3339_opts(SecondsFormat::Secs, true),
            });
        }

        let request = LookupRequest::new(&key, payload.clone(), wifi.to_vec());
        let body = request
            .to_json()
            .map_err(|e| LocatorError::Transport(format!("Failed to encode request: {e}")))?;

        let id = self.next_id;
        self.next_id += 1;
        let deadline = now
            + chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::zero());

        self.in_flight = Some(InFlightRequest {
            id,
            state: RequestState::Sending,
            deadline,
            timed_out: false,
        });

        tracing::info!(
            request_id = id,
            wifi = wifi.len(),
            cells = payload.cell_towers.len(),
            "Sending lookup request"
        );

        Ok(Attempt::Issued(OutboundRequest {
            id,
            body,
            timeout: self.timeout,
            deadline,
        }))
    }

    /// The call for `id` was submitted and its timeout armed.
    pub fn armed(&mut self, id: RequestId) -> bool {
        match self.in_flight.as_mut() {
            Some(req) if req.id == id && req.state == RequestState::Sending => {
                req.state = RequestState::AwaitingResponse;
                true
            }
            _ => false,
        }
    }

    /// The deadline for `id` passed. Returns whether the transport call
    /// should be cancelled; resolution waits for its completion.
    pub fn on_timeout(&mut self, id: RequestId) -> bool {
        match self.in_flight.as_mut() {
            Some(req) if req.id == id && !req.timed_out => {
                tracing::warn!(request_id = id, "Request timed out");
                req.timed_out = true;
                true
            }
            _ => false,
        }
    }

    /// Resolve `id` with the transport outcome. Unknown ids yield `None`.
    pub fn resolve(
        &mut self,
        id: RequestId,
        result: Result<TransportReply, TransportFailure>,
        now: DateTime<Utc>,
    ) -> Option<Resolution> {
        if self.in_flight_id() != Some(id) {
            tracing::debug!(request_id = id, "Received completion for unknown request");
            return None;
        }
        let request = self.in_flight.take()?;

        if request.timed_out {
            return Some(Resolution::TimedOut);
        }

        let resolution = match result {
            Ok(reply) => match parse_position(&reply.body) {
                Ok(position) => {
                    if let Err(e) = clear_key_failure(self.store.as_ref()) {
                        tracing::warn!("Failed to clear key failure time: {e}");
                    }
                    tracing::debug!(
                        request_id = id,
                        latitude = position.latitude,
                        longitude = position.longitude,
                        accuracy = position.accuracy,
                        "Lookup succeeded"
                    );
                    Resolution::Success(position)
                }
                Err(e) => Resolution::ProtocolError(e.to_string()),
            },
            Err(failure) => {
                let key_rejected = is_key_rejected(&failure.body);
                if key_rejected {
                    tracing::warn!(
                        "Location service rejected the lookup key, disabling requests for 12 hours"
                    );
                    let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
                    if let Err(e) = self.store.set(KEY_FAILURE_TIME_KEY, &stamp) {
                        tracing::warn!("Failed to record key failure time: {e}");
                    }
                }
                Resolution::TransportError {
                    message: failure.message,
                    key_rejected,
                }
            }
        };
        Some(resolution)
    }
}
