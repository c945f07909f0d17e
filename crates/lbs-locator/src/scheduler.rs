//! Adaptive query scheduler.
//!
//! Decides whether a new snapshot justifies a lookup and throttles the
//! request rate towards roughly one query every six minutes. A request has
//! to pass two gates: eligibility (new information or enough time since the
//! last query) and the local throttle (fully relaxed back-off or the adaptive
//! interval elapsed).

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::payload::QueryPayload;
use crate::snapshot::EnvironmentSnapshot;

/// Number of send timestamps kept for cadence estimation.
pub const HISTORY_CAPACITY: usize = 10;

pub const BACKOFF_BASE: Duration = Duration::from_millis(60_000);
pub const BACKOFF_STEP: Duration = Duration::from_millis(10_000);

pub const INITIAL_BACKOFF_FACTOR: u32 = 8;
pub const MIN_BACKOFF_FACTOR: u32 = 1;
pub const MAX_BACKOFF_FACTOR: u32 = 64;

/// Cadence assumed until enough history exists, and the cadence aimed for.
pub const TARGET_MINUTES_PER_QUERY: f64 = 6.0;
/// Below this cadence the back-off tightens.
pub const TIGHTEN_BELOW_MINUTES: f64 = 4.0;

const MIN_HISTORY_FOR_RATE: usize = 3;

/// Back-off factor and the interval derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackOff {
    factor: u32,
    interval: Duration,
}

impl BackOff {
    pub fn new() -> Self {
        Self::with_factor(INITIAL_BACKOFF_FACTOR)
    }

    fn with_factor(factor: u32) -> Self {
        let factor = factor.clamp(MIN_BACKOFF_FACTOR, MAX_BACKOFF_FACTOR);
        Self {
            factor,
            interval: BACKOFF_BASE + BACKOFF_STEP * factor,
        }
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Halve the factor, dropping to 1 from 2 or below.
    pub fn relax(&mut self) {
        let next = if self.factor <= 2 { 1 } else { self.factor / 2 };
        *self = Self::with_factor(next);
    }

    /// Double the factor, capping at 64 from 32 or above.
    pub fn tighten(&mut self) {
        let next = if self.factor >= 32 {
            MAX_BACKOFF_FACTOR
        } else {
            self.factor * 2
        };
        *self = Self::with_factor(next);
    }

    /// Adjust to the observed cadence.
    pub fn adapt(&mut self, minutes_per_query: f64) {
        if minutes_per_query > TARGET_MINUTES_PER_QUERY || self.factor > MAX_BACKOFF_FACTOR {
            self.relax();
        } else if minutes_per_query < TIGHTEN_BELOW_MINUTES {
            self.tighten();
        }
    }
}

impl Default for BackOff {
    fn default() -> Self {
        Self::new()
    }
}

/// Recent send timestamps, newest first.
#[derive(Debug, Clone, Default)]
pub struct QueryHistory {
    timestamps: VecDeque<DateTime<Utc>>,
}

impl QueryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, at: DateTime<Utc>) {
        self.timestamps.push_front(at);
        self.timestamps.truncate(HISTORY_CAPACITY);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DateTime<Utc>> {
        self.timestamps.iter()
    }

    /// Average minutes per query over the tracked window.
    pub fn minutes_per_query(&self) -> f64 {
        if self.timestamps.len() < MIN_HISTORY_FOR_RATE {
            return TARGET_MINUTES_PER_QUERY;
        }
        let (Some(newest), Some(oldest)) = (self.timestamps.front(), self.timestamps.back()) else {
            return TARGET_MINUTES_PER_QUERY;
        };
        let span_ms = (*newest - *oldest).num_milliseconds() as f64;
        (span_ms / (1000.0 * 60.0)) / self.timestamps.len() as f64
    }
}

/// The most recently sent query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    pub timestamp: DateTime<Utc>,
    pub payload: QueryPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerConditions {
    pub first_time_query: bool,
    pub interval_exceeded: bool,
    pub more_info: bool,
    pub new_cells: bool,
}

impl TriggerConditions {
    pub fn evaluate(
        candidate: &QueryPayload,
        previous: Option<&QueryRecord>,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let Some(previous) = previous else {
            return Self {
                first_time_query: true,
                interval_exceeded: true,
                more_info: candidate.field_count() > 0,
                new_cells: !candidate.cell_ids().is_empty(),
            };
        };
        let elapsed_ms = (now - previous.timestamp).num_milliseconds();
        Self {
            first_time_query: previous.payload.field_count() == 0,
            interval_exceeded: elapsed_ms >= interval.as_millis() as i64,
            more_info: more_info(candidate, &previous.payload),
            new_cells: candidate.cell_ids() != previous.payload.cell_ids(),
        }
    }

    pub fn any(&self) -> bool {
        self.first_time_query || self.interval_exceeded || self.more_info || self.new_cells
    }
}

/// Whether `candidate` carries strictly more top-level fields than `previous`.
pub fn more_info(candidate: &QueryPayload, previous: &QueryPayload) -> bool {
    candidate.field_count() > previous.field_count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    NoUsableData,
    WaitingForWifi,
    NoTriggerCondition,
    LocallyThrottled,
    Issue(TriggerConditions),
}

/// Outcome of one scheduling decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub issue: bool,
    pub query: Option<QueryRecord>,
    pub reason: DecisionReason,
}

impl Decision {
    fn suppressed(reason: DecisionReason) -> Self {
        Self {
            issue: false,
            query: None,
            reason,
        }
    }
}

/// Scheduler state for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Scheduler {
    backoff: BackOff,
    history: QueryHistory,
    last_query: Option<QueryRecord>,
    wait_for_wifi: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            backoff: BackOff::new(),
            history: QueryHistory::new(),
            last_query: None,
            wait_for_wifi: true,
        }
    }

    pub fn backoff(&self) -> BackOff {
        self.backoff
    }

    pub fn history(&self) -> &QueryHistory {
        &self.history
    }

    pub fn last_query(&self) -> Option<&QueryRecord> {
        self.last_query.as_ref()
    }

    /// Whether the one-shot Wi-Fi grace period is still pending.
    pub fn waiting_for_wifi(&self) -> bool {
        self.wait_for_wifi
    }

    /// Decide whether `snapshot` warrants a lookup at `now`.
    pub fn decide(&mut self, snapshot: &EnvironmentSnapshot, now: DateTime<Utc>) -> Decision {
        if !snapshot.has_usable_fields() {
            tracing::debug!("No field data (cell, wifi) available for online request");
            return Decision::suppressed(DecisionReason::NoUsableData);
        }

        if !snapshot.has_wifi() && self.wait_for_wifi {
            // Wi-Fi scans can lag behind cell data; give them one chance.
            tracing::debug!("No wifi data available for online request, postponing");
            self.wait_for_wifi = false;
            return Decision::suppressed(DecisionReason::WaitingForWifi);
        }

        let candidate = QueryPayload::from_snapshot(snapshot);
        let conditions = TriggerConditions::evaluate(
            &candidate,
            self.last_query.as_ref(),
            self.backoff.interval(),
            now,
        );

        if !conditions.any() {
            tracing::debug!("No required conditions true for online query");
            return Decision::suppressed(DecisionReason::NoTriggerCondition);
        }

        self.backoff.adapt(self.history.minutes_per_query());

        if self.backoff.factor() != MIN_BACKOFF_FACTOR && !conditions.interval_exceeded {
            tracing::debug!(
                factor = self.backoff.factor(),
                interval_ms = self.backoff.interval().as_millis() as u64,
                "Locally throttling online query due to interval"
            );
            return Decision::suppressed(DecisionReason::LocallyThrottled);
        }

        tracing::debug!(
            first = conditions.first_time_query,
            interval = conditions.interval_exceeded,
            info = conditions.more_info,
            cells = conditions.new_cells,
            "Performing online query"
        );
        self.history.push(now);

        Decision {
            issue: true,
            query: Some(QueryRecord {
                timestamp: now,
                payload: candidate,
            }),
            reason: DecisionReason::Issue(conditions),
        }
    }

    /// Record `query` as the last one sent.
    pub fn accept(&mut self, query: QueryRecord) {
        self.last_query = Some(query);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CarrierInfo, CellObservation, RadioType, WifiObservation};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn cell(id: u32) -> CellObservation {
        CellObservation {
            radio_type: RadioType::Lte,
            mobile_country_code: 250,
            mobile_network_code: 1,
            location_area_code: 42,
            cell_id: id,
            signal_strength: Some(-90),
        }
    }

    fn wifi() -> WifiObservation {
        WifiObservation {
            mac_address: "00:11:22:33:44:55".into(),
            signal_strength: -60,
            age_millis: 500,
        }
    }

    fn snapshot(cells: &[u32], with_wifi: bool) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            cells: cells.iter().map(|id| cell(*id)).collect(),
            wifi: if with_wifi { vec![wifi()] } else { Vec::new() },
            ..Default::default()
        }
    }

    fn minutes(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    fn issue_and_accept(s: &mut Scheduler, snap: &EnvironmentSnapshot, at: DateTime<Utc>) -> bool {
        let d = s.decide(snap, at);
        if let Some(q) = d.query.clone() {
            s.accept(q);
        }
        d.issue
    }

    #[test]
    fn test_backoff_initial_interval() {
        let b = BackOff::new();
        assert_eq!(b.factor(), 8);
        assert_eq!(b.interval(), Duration::from_millis(140_000));
    }

    #[test]
    fn test_backoff_stays_in_range() {
        let mut b = BackOff::new();
        for _ in 0..20 {
            b.tighten();
            assert!(b.factor() <= MAX_BACKOFF_FACTOR);
        }
        assert_eq!(b.factor(), 64);
        assert_eq!(b.interval(), Duration::from_millis(60_000 + 10_000 * 64));
        for _ in 0..20 {
            b.relax();
            assert!(b.factor() >= MIN_BACKOFF_FACTOR);
        }
        assert_eq!(b.factor(), 1);
        assert_eq!(b.interval(), Duration::from_millis(70_000));
    }

    #[test]
    fn test_backoff_mixed_sequence_interval_exact() {
        let mut b = BackOff::new();
        let steps = [true, false, false, true, true, true, false, true, true, false];
        for tighten in steps {
            if tighten {
                b.tighten();
            } else {
                b.relax();
            }
            assert!((MIN_BACKOFF_FACTOR..=MAX_BACKOFF_FACTOR).contains(&b.factor()));
            assert_eq!(
                b.interval().as_millis(),
                60_000 + 10_000 * u128::from(b.factor())
            );
        }
    }

    #[test]
    fn test_backoff_adapt_neutral_rate_keeps_factor() {
        let mut b = BackOff::new();
        b.adapt(6.0);
        assert_eq!(b.factor(), 8);
        b.adapt(5.0);
        assert_eq!(b.factor(), 8);
        b.adapt(3.0);
        assert_eq!(b.factor(), 16);
        b.adapt(10.0);
        assert_eq!(b.factor(), 8);
    }

    #[test]
    fn test_history_capacity_and_order() {
        let mut h = QueryHistory::new();
        for i in 0..15 {
            h.push(t0() + minutes(i));
        }
        assert_eq!(h.len(), HISTORY_CAPACITY);
        assert_eq!(*h.iter().next().unwrap(), t0() + minutes(14));
        assert_eq!(*h.iter().last().unwrap(), t0() + minutes(5));
    }

    #[test]
    fn test_history_rate() {
        let mut h = QueryHistory::new();
        h.push(t0());
        h.push(t0() + minutes(3));
        assert_eq!(h.minutes_per_query(), 6.0);
        h.push(t0() + minutes(6));
        // 6 minutes span over 3 entries
        assert!((h.minutes_per_query() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_more_info_is_strict() {
        let p1 = QueryPayload {
            cell_towers: vec![cell(1)],
            ..Default::default()
        };
        let p2 = QueryPayload::from_snapshot(&EnvironmentSnapshot {
            cells: vec![cell(1)],
            carrier: Some(CarrierInfo {
                carrier_name: "Beeline".into(),
                home_mobile_country_code: "250".into(),
                home_mobile_network_code: "99".into(),
            }),
            ..Default::default()
        });
        assert_eq!(p1.cell_ids(), p2.cell_ids());
        assert!(more_info(&p2, &p1));
        assert!(!more_info(&p1, &p2));
        assert!(!more_info(&p1, &p1));
    }

    #[test]
    fn test_no_usable_data() {
        let mut s = Scheduler::new();
        let d = s.decide(&EnvironmentSnapshot::default(), t0());
        assert!(!d.issue);
        assert_eq!(d.reason, DecisionReason::NoUsableData);
        assert!(s.waiting_for_wifi());
    }

    #[test]
    fn test_wifi_grace_period_consumed_once() {
        let mut s = Scheduler::new();
        let snap = snapshot(&[1], false);
        let d = s.decide(&snap, t0());
        assert!(!d.issue);
        assert_eq!(d.reason, DecisionReason::WaitingForWifi);
        assert!(!s.waiting_for_wifi());

        let d = s.decide(&snap, t0() + chrono::Duration::seconds(1));
        assert!(d.issue);
        assert!(matches!(d.reason, DecisionReason::Issue(c) if c.first_time_query));
        assert_eq!(s.history().len(), 1);
    }

    #[test]
    fn test_wifi_present_skips_grace_period() {
        let mut s = Scheduler::new();
        let d = s.decide(&snapshot(&[1], true), t0());
        assert!(d.issue);
        assert!(s.waiting_for_wifi());
    }

    #[test]
    fn test_same_cells_within_interval_not_eligible() {
        let mut s = Scheduler::new();
        let snap = snapshot(&[1, 2], true);
        assert!(issue_and_accept(&mut s, &snap, t0()));
        let d = s.decide(&snap, t0() + minutes(1));
        assert!(!d.issue);
        assert_eq!(d.reason, DecisionReason::NoTriggerCondition);
        assert_eq!(s.history().len(), 1);
    }

    #[test]
    fn test_same_cells_after_interval_issues() {
        let mut s = Scheduler::new();
        let snap = snapshot(&[1], true);
        assert!(issue_and_accept(&mut s, &snap, t0()));
        let d = s.decide(&snap, t0() + minutes(3));
        assert!(d.issue);
        assert!(matches!(d.reason, DecisionReason::Issue(c) if c.interval_exceeded));
    }

    #[test]
    fn test_new_cells_locally_throttled() {
        let mut s = Scheduler::new();
        assert!(issue_and_accept(&mut s, &snapshot(&[1], true), t0()));
        let before = s.last_query().cloned();
        let d = s.decide(&snapshot(&[2], true), t0() + minutes(1));
        assert!(!d.issue);
        assert_eq!(d.reason, DecisionReason::LocallyThrottled);
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.last_query().cloned(), before);
    }

    #[test]
    fn test_decide_does_not_replace_record() {
        let mut s = Scheduler::new();
        let d = s.decide(&snapshot(&[1], true), t0());
        assert!(d.issue);
        assert!(s.last_query().is_none());
        s.accept(d.query.unwrap());
        assert_eq!(s.last_query().unwrap().timestamp, t0());
    }

    #[test]
    fn test_frequent_queries_tighten_backoff() {
        let mut s = Scheduler::new();
        let mut at = t0();
        // Each query moves to new cells after the interval has passed.
        for id in 1..=4u32 {
            let interval = chrono::Duration::from_std(s.backoff().interval()).unwrap();
            at += interval;
            assert!(issue_and_accept(&mut s, &snapshot(&[id], true), at));
        }
        // ~2.3 minutes/query with at least three samples: tightened.
        assert!(s.backoff().factor() > INITIAL_BACKOFF_FACTOR);
    }

    #[test]
    fn test_sparse_queries_relax_to_one() {
        let mut s = Scheduler::new();
        let mut at = t0();
        for id in 1..=8u32 {
            at += minutes(60);
            assert!(issue_and_accept(&mut s, &snapshot(&[id], true), at));
        }
        assert_eq!(s.backoff().factor(), 1);

        // Fully relaxed: new cells go out even inside the interval.
        let d = s.decide(&snapshot(&[100], true), at + chrono::Duration::seconds(5));
        assert!(d.issue);
    }
}
