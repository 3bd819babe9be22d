use serde::{Deserialize, Serialize};

/// Injection/verification attempts per segment beyond the first.
pub const MAX_VERIFY_RETRIES: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Idle,
    SegmentLoading,
    SegmentVerifying,
    SegmentTimerRunning,
    SegmentComplete,
    ClaimUnlocked,
    Claiming,
    Claimed,
}

impl Default for SessionPhase {
    fn default() -> Self {
        SessionPhase::Idle
    }
}

/// Everything the modal UI needs to render one reward session. Created
/// fresh on every open; nothing survives a close.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RewardSessionState {
    pub phase: SessionPhase,
    /// 1-based; only meaningful outside `Idle`.
    pub current_segment: u32,
    pub segment_count: u32,
    pub segment_secs: u32,
    pub remaining_secs: u32,
    pub segment_elapsed: bool,
    pub verified: bool,
    pub blocked: bool,
    pub loading: bool,
    pub retry_count: u32,
    pub claim_unlocked: bool,
    pub claiming: bool,
    pub claimed: bool,
    pub claim_error: Option<String>,
    pub reward_credits: i64,
}

impl Default for RewardSessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            current_segment: 0,
            segment_count: 0,
            segment_secs: 0,
            remaining_secs: 0,
            segment_elapsed: false,
            verified: false,
            blocked: false,
            loading: false,
            retry_count: 0,
            claim_unlocked: false,
            claiming: false,
            claimed: false,
            claim_error: None,
            reward_credits: 0,
        }
    }
}

impl RewardSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modal open: full reset, then segment 1 starts loading. Stale flags
    /// from a previous session must never leak into a new one.
    pub fn begin(&mut self, segment_count: u32, segment_secs: u32, reward_credits: i64) {
        *self = Self {
            phase: SessionPhase::SegmentLoading,
            current_segment: 1,
            segment_count,
            segment_secs,
            remaining_secs: segment_secs,
            loading: true,
            reward_credits,
            ..Self::default()
        };
    }

    pub fn mark_verifying(&mut self) {
        self.phase = SessionPhase::SegmentVerifying;
    }

    /// Verification succeeded: the countdown for this segment may start.
    pub fn mark_verified(&mut self) {
        self.verified = true;
        self.blocked = false;
        self.loading = false;
        self.retry_count = 0;
        self.remaining_secs = self.segment_secs;
        self.segment_elapsed = false;
        self.phase = SessionPhase::SegmentTimerRunning;
    }

    /// Verification timed out but the retry budget is not exhausted yet.
    pub fn record_retry(&mut self) {
        self.retry_count += 1;
        self.loading = true;
        self.phase = SessionPhase::SegmentLoading;
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= MAX_VERIFY_RETRIES
    }

    /// Retry budget exhausted (or no markup at all): the ad slot is treated
    /// as blocked and the timer never starts.
    pub fn mark_blocked(&mut self) {
        self.blocked = true;
        self.verified = false;
        self.loading = false;
    }

    /// One-second tick while the segment timer runs. On reaching zero the
    /// segment completes, and the final segment unlocks the claim gate.
    pub fn tick(&mut self) {
        if self.phase != SessionPhase::SegmentTimerRunning {
            return;
        }

        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs > 0 {
            return;
        }

        self.segment_elapsed = true;
        if self.current_segment >= self.segment_count {
            self.claim_unlocked = true;
            self.phase = SessionPhase::ClaimUnlocked;
        } else {
            self.phase = SessionPhase::SegmentComplete;
        }
    }

    pub fn can_advance(&self) -> bool {
        self.phase == SessionPhase::SegmentComplete && self.current_segment < self.segment_count
    }

    /// "Watch next" on a completed non-final segment. Per-segment flags are
    /// cleared; session-level flags stay.
    pub fn advance_segment(&mut self) -> bool {
        if !self.can_advance() {
            return false;
        }

        self.current_segment += 1;
        self.remaining_secs = self.segment_secs;
        self.segment_elapsed = false;
        self.verified = false;
        self.blocked = false;
        self.loading = true;
        self.retry_count = 0;
        self.phase = SessionPhase::SegmentLoading;
        true
    }

    /// Claim preconditions, re-checked at claim time. An in-flight claim
    /// makes further triggers no-ops, which is the entire re-entry guard.
    pub fn begin_claim(&mut self) -> bool {
        if !self.claim_unlocked || self.claiming || self.claimed || !self.verified {
            return false;
        }

        self.claiming = true;
        self.claim_error = None;
        self.phase = SessionPhase::Claiming;
        true
    }

    pub fn claim_succeeded(&mut self) {
        self.claiming = false;
        self.claimed = true;
        self.claim_error = None;
        self.phase = SessionPhase::Claimed;
    }

    pub fn claim_failed(&mut self, message: String) {
        self.claiming = false;
        self.claimed = false;
        self.claim_error = Some(message);
        self.phase = SessionPhase::ClaimUnlocked;
    }

    /// Modal close from any phase.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Overall progress across segments. Assumes every segment shares one
    /// duration; see DESIGN.md for why this formula is kept as-is.
    pub fn progress_secs(&self) -> u32 {
        if self.phase == SessionPhase::Idle || self.current_segment == 0 {
            return 0;
        }
        (self.current_segment - 1) * self.segment_secs + (self.segment_secs - self.remaining_secs)
    }
}
