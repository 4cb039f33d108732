//! Clock sources and the four-timestamp offset estimator.
//!
//! Every device reads time through a [`WallClock`] handed to it at
//! construction. The coordinator wraps its clock in a [`ReferenceClock`]
//! (offset pinned at zero); each participant wraps its clock in a
//! [`ClockEstimator`], which tracks one SYNC / FOLLOW_UP / DELAY_REQUEST /
//! DELAY_RESPONSE round at a time.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use contracts::{Millis, Timestamp};
use serde::Serialize;
use tracing::{debug, trace};

/// Source of local wall-clock milliseconds
pub trait WallClock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> Timestamp;
}

/// Unix epoch milliseconds from the host clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock driven by the tokio timer.
///
/// Starts at the host's epoch time and advances with `tokio::time`, so it
/// follows virtual time when the runtime clock is paused.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_ms: Timestamp,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis())
    }

    pub fn starting_at(origin_ms: Timestamp) -> Self {
        Self {
            origin_ms,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for TokioClock {
    fn now_ms(&self) -> Timestamp {
        self.origin_ms + self.started.elapsed().as_millis() as Timestamp
    }
}

/// Hand-driven clock for tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Millis) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_ms(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Another clock shifted by a constant amount.
///
/// Simulates a device whose wall clock runs `skew_ms` ahead of the
/// underlying clock (negative: behind).
#[derive(Debug, Clone)]
pub struct SkewedClock {
    inner: Arc<dyn WallClock>,
    skew_ms: Millis,
}

impl SkewedClock {
    pub fn new(inner: Arc<dyn WallClock>, skew_ms: Millis) -> Self {
        Self { inner, skew_ms }
    }

    pub fn skew_ms(&self) -> Millis {
        self.skew_ms
    }
}

impl WallClock for SkewedClock {
    fn now_ms(&self) -> Timestamp {
        self.inner.now_ms() + self.skew_ms
    }
}

/// Coordinator clock: adjusted time is wall time.
#[derive(Debug, Clone)]
pub struct ReferenceClock {
    wall: Arc<dyn WallClock>,
}

impl ReferenceClock {
    pub fn new(wall: Arc<dyn WallClock>) -> Self {
        Self { wall }
    }

    pub fn adjusted_time(&self) -> Timestamp {
        self.wall.now_ms()
    }

    /// Always zero
    pub fn offset(&self) -> Millis {
        0
    }
}

/// Where the estimator is inside the current round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// No round in flight
    #[default]
    Idle,
    /// SYNC seen, waiting for FOLLOW_UP
    SyncReceived,
    /// FOLLOW_UP seen, DELAY_REQUEST on its way
    FollowUpReceived,
    /// DELAY_REQUEST sent, waiting for DELAY_RESPONSE
    AwaitingResponse,
}

/// Snapshot of the estimator's round state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ClockEstimate {
    pub t1: Timestamp,
    pub t2: Timestamp,
    pub t3: Timestamp,
    pub t4: Timestamp,
    /// Currently applied offset (ms); adjusted = wall - offset
    pub offset: Millis,
    pub phase: RoundPhase,
    /// Number of rounds that produced an offset
    pub completed_rounds: u64,
}

/// Participant-side offset estimator
///
/// Round state is keyed to the most recent SYNC: any message arriving out
/// of sequence abandons the round and leaves the applied offset untouched.
#[derive(Debug)]
pub struct ClockEstimator {
    wall: Arc<dyn WallClock>,
    t1: Timestamp,
    t2: Timestamp,
    t3: Timestamp,
    t4: Timestamp,
    offset: Millis,
    phase: RoundPhase,
    completed_rounds: u64,
}

impl ClockEstimator {
    pub fn new(wall: Arc<dyn WallClock>) -> Self {
        Self {
            wall,
            t1: 0,
            t2: 0,
            t3: 0,
            t4: 0,
            offset: 0,
            phase: RoundPhase::Idle,
            completed_rounds: 0,
        }
    }

    /// Local wall time
    pub fn wall_time(&self) -> Timestamp {
        self.wall.now_ms()
    }

    /// Estimate of the coordinator's clock
    pub fn adjusted_time(&self) -> Timestamp {
        self.wall.now_ms() - self.offset
    }

    pub fn offset(&self) -> Millis {
        self.offset
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// SYNC arrived: start a new round, abandoning any in flight.
    pub fn on_sync(&mut self) {
        if self.phase != RoundPhase::Idle {
            trace!(phase = ?self.phase, "abandoning clock round on new SYNC");
        }
        self.t1 = 0;
        self.t3 = 0;
        self.t4 = 0;
        self.t2 = self.wall.now_ms();
        self.phase = RoundPhase::SyncReceived;
    }

    /// FOLLOW_UP arrived carrying the coordinator's SYNC send time.
    ///
    /// Returns `true` if the caller must now send DELAY_REQUEST and then
    /// call [`Self::on_delay_request_sent`]. Returns `false` when no SYNC is
    /// pending; the message is then ignored.
    pub fn on_follow_up(&mut self, t1: Timestamp) -> bool {
        if self.phase != RoundPhase::SyncReceived {
            trace!(phase = ?self.phase, "FOLLOW_UP outside of a round, ignored");
            self.abandon();
            return false;
        }
        self.t1 = t1;
        self.phase = RoundPhase::FollowUpReceived;
        true
    }

    /// DELAY_REQUEST has just been handed to the transport.
    pub fn on_delay_request_sent(&mut self) {
        if self.phase != RoundPhase::FollowUpReceived {
            self.abandon();
            return;
        }
        self.t3 = self.wall.now_ms();
        self.phase = RoundPhase::AwaitingResponse;
    }

    /// DELAY_RESPONSE arrived carrying the coordinator's receipt time.
    ///
    /// Completes the round and returns the new offset, or `None` if the
    /// response did not belong to a round in progress.
    pub fn on_delay_response(&mut self, t4: Timestamp) -> Option<Millis> {
        if self.phase != RoundPhase::AwaitingResponse {
            trace!(phase = ?self.phase, "DELAY_RESPONSE outside of a round, ignored");
            self.abandon();
            return None;
        }
        self.t4 = t4;
        let offset = compute_offset(self.t1, self.t2, self.t3, self.t4);
        self.offset = offset;
        self.completed_rounds += 1;
        self.phase = RoundPhase::Idle;

        debug!(
            t1 = self.t1,
            t2 = self.t2,
            t3 = self.t3,
            t4 = self.t4,
            offset,
            "clock round complete"
        );
        Some(offset)
    }

    /// Forget round state and the applied offset (coordinator lost)
    pub fn reset(&mut self) {
        self.abandon();
        self.t1 = 0;
        self.t2 = 0;
        self.t3 = 0;
        self.t4 = 0;
        self.offset = 0;
    }

    pub fn estimate(&self) -> ClockEstimate {
        ClockEstimate {
            t1: self.t1,
            t2: self.t2,
            t3: self.t3,
            t4: self.t4,
            offset: self.offset,
            phase: self.phase,
            completed_rounds: self.completed_rounds,
        }
    }

    fn abandon(&mut self) {
        self.phase = RoundPhase::Idle;
    }
}

/// `((t2 - t1) - (t4 - t3)) / 2`, truncating toward zero
pub fn compute_offset(t1: Timestamp, t2: Timestamp, t3: Timestamp, t4: Timestamp) -> Millis {
    ((t2 - t1) - (t4 - t3)) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator_at(start: Timestamp) -> (Arc<ManualClock>, ClockEstimator) {
        let clock = Arc::new(ManualClock::new(start));
        let estimator = ClockEstimator::new(clock.clone());
        (clock, estimator)
    }

    #[test]
    fn test_full_round_offset() {
        let (clock, mut est) = estimator_at(110);
        est.on_sync();
        assert!(est.on_follow_up(100));
        clock.set(115);
        est.on_delay_request_sent();
        assert_eq!(est.on_delay_response(130), Some(-2));

        assert_eq!(est.offset(), -2);
        clock.set(1000);
        assert_eq!(est.adjusted_time(), 1002);

        let snapshot = est.estimate();
        assert_eq!(
            (snapshot.t1, snapshot.t2, snapshot.t3, snapshot.t4),
            (100, 110, 115, 130)
        );
        assert_eq!(snapshot.completed_rounds, 1);
        assert_eq!(snapshot.phase, RoundPhase::Idle);
    }

    #[test]
    fn test_interrupted_round_keeps_previous_offset() {
        let (clock, mut est) = estimator_at(110);
        est.on_sync();
        est.on_follow_up(100);
        clock.set(115);
        est.on_delay_request_sent();
        est.on_delay_response(130);
        assert_eq!(est.offset(), -2);

        // SYNC + FOLLOW_UP, then a new SYNC before the response
        clock.set(2000);
        est.on_sync();
        est.on_follow_up(1500);
        est.on_delay_request_sent();
        est.on_sync();
        assert_eq!(est.offset(), -2);

        // The stale response must not complete the new round
        assert_eq!(est.on_delay_response(2100), None);
        assert_eq!(est.offset(), -2);
    }

    #[test]
    fn test_out_of_order_messages_are_ignored() {
        let (_clock, mut est) = estimator_at(0);

        assert!(!est.on_follow_up(5));
        assert_eq!(est.on_delay_response(10), None);

        est.on_sync();
        // DELAY_RESPONSE before FOLLOW_UP abandons the round
        assert_eq!(est.on_delay_response(10), None);
        assert!(!est.on_follow_up(5));
        assert_eq!(est.estimate().completed_rounds, 0);
        assert_eq!(est.offset(), 0);
    }

    #[test]
    fn test_symmetric_delay_recovers_skew() {
        // Participant runs 250 ms ahead, 7 ms one-way latency
        let coordinator = Arc::new(ManualClock::new(10_000));
        let participant = SkewedClock::new(coordinator.clone(), 250);
        let mut est = ClockEstimator::new(Arc::new(participant));

        let t1 = coordinator.now_ms();
        coordinator.advance(7);
        est.on_sync();
        est.on_follow_up(t1);
        est.on_delay_request_sent();
        coordinator.advance(7);
        let t4 = coordinator.now_ms();

        assert_eq!(est.on_delay_response(t4), Some(250));
        assert_eq!(est.adjusted_time(), coordinator.now_ms());
    }

    #[test]
    fn test_reference_clock_is_wall() {
        let wall = Arc::new(ManualClock::new(42));
        let reference = ReferenceClock::new(wall.clone());
        assert_eq!(reference.adjusted_time(), 42);
        wall.advance(8);
        assert_eq!(reference.adjusted_time(), 50);
        assert_eq!(reference.offset(), 0);
    }

    #[test]
    fn test_offset_truncates_toward_zero() {
        assert_eq!(compute_offset(100, 110, 115, 130), -2);
        assert_eq!(compute_offset(100, 115, 115, 130), 0);
        assert_eq!(compute_offset(0, 5, 0, 0), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_virtual_time() {
        let clock = TokioClock::starting_at(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        tokio::time::advance(std::time::Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 1_250);
    }
}
