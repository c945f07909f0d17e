//! lbs-locator — online cell/Wi-Fi geolocation with adaptive request scheduling.

pub mod config;
pub mod events;
pub mod lifecycle;
pub mod locator;
pub mod payload;
pub mod scheduler;
pub mod snapshot;
pub mod storage;
pub mod transport;
pub mod types;

pub use config::{load_fallbacks, LocatorConfig};
pub use events::{EventBus, LocatorEvent};
pub use lifecycle::{Attempt, RequestLifecycle, RequestState, Resolution};
pub use locator::{Locator, LocatorHandle, LocatorStatus};
pub use payload::{parse_position, LookupRequest, QueryPayload};
pub use scheduler::{BackOff, Decision, DecisionReason, QueryHistory, QueryRecord, Scheduler};
pub use snapshot::{
    cell_tower_fields, wlan_access_point_fields, CarrierInfo, CellObservation,
    EnvironmentSnapshot, FallbackPreferences, RadioType, RawCell, RawEnvironment,
    SnapshotBuilder, WifiObservation, WlanService,
};
pub use storage::{JsonFileStore, KeyFile, KeySource, MemoryStore, SettingsStore, StaticKey};
pub use transport::{HttpTransport, Transport, TransportFailure, TransportReply};
pub use types::*;
