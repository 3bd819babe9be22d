use std::{
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Result};
use chrono::Utc;
use log::{error, info, warn};
use tokio::{
    sync::{oneshot, watch, Mutex},
    task::JoinHandle,
    time,
};

use crate::{
    ads::{sanitize_markup, SanitizedMarkup, ScriptRegistry},
    rewards::RewardGranter,
    settings::SettingsStore,
    verify::{AdProbe, VerifierController, VerifyConfig, VerifyOutcome},
};

use super::events::SessionEmitter;
use super::state::{RewardSessionState, SessionPhase};

/// Debounce and display delays. None of these are load-bearing; they let
/// DOM mutations settle between injections and keep the claimed state on
/// screen long enough to read.
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    pub tick_interval: Duration,
    pub open_delay: Duration,
    pub advance_delay: Duration,
    pub reinject_delay: Duration,
    pub claimed_close_delay: Duration,
    pub verify: VerifyConfig,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            open_delay: Duration::from_millis(300),
            advance_delay: Duration::from_millis(400),
            reinject_delay: Duration::from_millis(150),
            claimed_close_delay: Duration::from_millis(1200),
            verify: VerifyConfig::default(),
        }
    }
}

/// Sequences ad segments, gates the countdown on verified visibility, and
/// owns the one-shot claim. All spawned work (segment runner, verifier
/// poll, countdown ticker) is cancelled synchronously on close; nothing
/// mutates state after the session returns to idle.
#[derive(Clone)]
pub struct RewardSessionController {
    state: Arc<Mutex<RewardSessionState>>,
    settings: Arc<SettingsStore>,
    registry: Arc<dyn ScriptRegistry>,
    granter: Arc<dyn RewardGranter>,
    emitter: Arc<dyn SessionEmitter>,
    verifier: Arc<Mutex<VerifierController>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    segment_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    closer: Arc<Mutex<Option<JoinHandle<()>>>>,
    probe_tx: Arc<watch::Sender<Option<AdProbe>>>,
    /// Sanitized once per modal open; never re-fetched mid-session.
    markup: Arc<Mutex<Option<SanitizedMarkup>>>,
    /// Bumped on every close. In-flight work captured under an older epoch
    /// must not touch the session it outlived.
    epoch: Arc<AtomicU64>,
    timing: SessionTiming,
}

impl RewardSessionController {
    pub fn new(
        settings: Arc<SettingsStore>,
        registry: Arc<dyn ScriptRegistry>,
        granter: Arc<dyn RewardGranter>,
        emitter: Arc<dyn SessionEmitter>,
    ) -> Self {
        Self::with_timing(settings, registry, granter, emitter, SessionTiming::default())
    }

    pub fn with_timing(
        settings: Arc<SettingsStore>,
        registry: Arc<dyn ScriptRegistry>,
        granter: Arc<dyn RewardGranter>,
        emitter: Arc<dyn SessionEmitter>,
        timing: SessionTiming,
    ) -> Self {
        let (probe_tx, _probe_rx) = watch::channel(None);

        Self {
            state: Arc::new(Mutex::new(RewardSessionState::new())),
            settings,
            registry,
            granter,
            emitter,
            verifier: Arc::new(Mutex::new(VerifierController::new(timing.verify))),
            ticker: Arc::new(Mutex::new(None)),
            segment_task: Arc::new(Mutex::new(None)),
            closer: Arc::new(Mutex::new(None)),
            probe_tx: Arc::new(probe_tx),
            markup: Arc::new(Mutex::new(None)),
            epoch: Arc::new(AtomicU64::new(0)),
            timing,
        }
    }

    pub async fn get_snapshot(&self) -> RewardSessionState {
        self.state.lock().await.clone()
    }

    /// Modal open: full reset, markup fetched and sanitized once, then
    /// segment 1 starts after a short settle delay.
    pub async fn open(&self) -> Result<RewardSessionState> {
        let reward = self.settings.reward();

        {
            let mut state = self.state.lock().await;
            if state.phase != SessionPhase::Idle {
                bail!("reward session already open");
            }
            state.begin(
                reward.segment_count.max(1),
                reward.segment_secs.max(1),
                reward.reward_credits,
            );
        }

        *self.markup.lock().await = Some(sanitize_markup(&reward.ad_markup));

        info!(
            "reward session opened ({} segment(s) x {}s, {} credit(s))",
            reward.segment_count, reward.segment_secs, reward.reward_credits
        );
        self.emit_state().await;
        self.spawn_segment(self.timing.open_delay).await;

        Ok(self.get_snapshot().await)
    }

    /// Modal close from any phase. Cancels the segment runner, the verifier
    /// poll, and the countdown before the state reset; partial progress is
    /// discarded.
    pub async fn close(&self) -> Result<()> {
        {
            let state = self.state.lock().await;
            if state.phase == SessionPhase::Idle {
                return Ok(());
            }
        }

        info!("closing reward session");

        {
            let mut guard = self.segment_task.lock().await;
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
        self.verifier.lock().await.stop().await?;
        {
            let mut guard = self.ticker.lock().await;
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }

        if let Err(err) = self.registry.revoke_all() {
            warn!("failed to revoke injected ad scripts: {err:#}");
        }

        self.probe_tx.send_replace(None);
        *self.markup.lock().await = None;

        {
            let mut state = self.state.lock().await;
            state.reset();
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.emit_state().await;

        // Taken last: close may be running on the auto-close task itself,
        // and aborting it earlier would cut the teardown short.
        let closer = { self.closer.lock().await.take() };
        if let Some(handle) = closer {
            handle.abort();
        }

        Ok(())
    }

    /// "Watch next" on a completed non-final segment.
    pub async fn watch_next(&self) -> Result<RewardSessionState> {
        {
            let mut state = self.state.lock().await;
            if !state.advance_segment() {
                bail!("no completed segment to advance from");
            }
        }

        self.emit_state().await;
        self.spawn_segment(self.timing.advance_delay).await;

        Ok(self.get_snapshot().await)
    }

    /// Latest layout probe from the webview; the verifier samples it.
    pub async fn report_probe(&self, probe: AdProbe) -> Result<()> {
        self.probe_tx.send_replace(Some(probe));
        Ok(())
    }

    /// One-shot claim. Re-entry while a claim is in flight is a no-op; a
    /// failed grant leaves the gate unlocked so the user can retry without
    /// re-watching ads.
    pub async fn claim(&self) -> Result<RewardSessionState> {
        let (credits, epoch) = {
            let mut state = self.state.lock().await;
            if state.claiming {
                info!("claim already in flight; ignoring duplicate trigger");
                return Ok(state.clone());
            }
            if !state.begin_claim() {
                bail!("claim is not available");
            }
            (state.reward_credits, self.epoch.load(Ordering::SeqCst))
        };
        self.emit_state().await;

        let result = self.granter.grant(credits).await;

        // The modal can close while the grant is in flight; its reset must
        // stand, so a stale outcome is dropped instead of applied.
        let stale = {
            let mut state = self.state.lock().await;
            let live = self.epoch.load(Ordering::SeqCst) == epoch
                && state.phase == SessionPhase::Claiming;
            if live {
                match &result {
                    Ok(_) => state.claim_succeeded(),
                    Err(err) => state.claim_failed(err.to_string()),
                }
            }
            !live
        };

        match result {
            Ok(receipt) => {
                info!(
                    "reward claimed: {credits} credit(s), claim {}, balance {}",
                    receipt.claim_id, receipt.new_balance
                );
                // Credits landed either way; only the session display is
                // skipped once it has been closed.
                self.emitter.reward_claimed(credits, receipt.new_balance);
                if !stale {
                    self.emit_state().await;
                    self.spawn_auto_close().await;
                }
            }
            Err(err) => {
                warn!("reward grant failed: {err:#}");
                if !stale {
                    self.emit_state().await;
                }
            }
        }

        Ok(self.get_snapshot().await)
    }

    async fn spawn_segment(&self, delay: Duration) {
        let mut guard = self.segment_task.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }

        let controller = self.clone();
        *guard = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            if let Err(err) = controller.run_segment().await {
                error!("segment run failed: {err:#}");
            }
        }));
    }

    /// Inject → verify, with one bounded retry of the whole cycle. The
    /// countdown only starts once the verifier reports the ad visible.
    async fn run_segment(&self) -> Result<()> {
        let markup = { self.markup.lock().await.clone() };
        let Some(markup) = markup else {
            return Ok(());
        };

        if markup.is_empty() {
            warn!("no ad markup configured; session blocked");
            {
                let mut state = self.state.lock().await;
                state.mark_blocked();
            }
            self.emit_state().await;
            return Ok(());
        }

        loop {
            // Fresh cache-buster per injection, including the retry and
            // every later segment.
            self.registry
                .inject(&markup.with_cache_buster(Utc::now().timestamp_millis()))?;
            {
                let mut state = self.state.lock().await;
                if state.phase != SessionPhase::SegmentLoading {
                    return Ok(());
                }
                state.mark_verifying();
            }
            self.emit_state().await;

            self.probe_tx.send_replace(None);
            let (outcome_tx, outcome_rx) = oneshot::channel();
            self.verifier
                .lock()
                .await
                .start(self.probe_tx.subscribe(), outcome_tx)?;
            let outcome = outcome_rx.await;
            self.verifier.lock().await.stop().await?;

            match outcome {
                Ok(VerifyOutcome::Visible) => {
                    {
                        let mut state = self.state.lock().await;
                        state.mark_verified();
                    }
                    info!("ad verified visible; starting segment countdown");
                    self.emit_state().await;
                    self.spawn_ticker().await;
                    return Ok(());
                }
                Ok(VerifyOutcome::TimedOut) => {
                    let exhausted = {
                        let mut state = self.state.lock().await;
                        if state.retries_exhausted() {
                            state.mark_blocked();
                            true
                        } else {
                            state.record_retry();
                            false
                        }
                    };
                    self.emit_state().await;

                    if exhausted {
                        warn!("ad failed to render after retry; session blocked");
                        return Ok(());
                    }

                    info!("ad not visible within window; re-injecting");
                    time::sleep(self.timing.reinject_delay).await;
                }
                Err(_) => {
                    // Verifier cancelled; the modal is closing.
                    return Ok(());
                }
            }
        }
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let emitter = self.emitter.clone();
        let tick_interval = self.timing.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            // The first interval tick resolves immediately; skip it so the
            // first decrement lands a full tick after verification.
            interval.tick().await;

            loop {
                interval.tick().await;

                let snapshot = {
                    let mut guard = state.lock().await;
                    if guard.phase != SessionPhase::SegmentTimerRunning {
                        break;
                    }
                    guard.tick();
                    guard.clone()
                };

                emitter.session_changed(&snapshot);

                if snapshot.phase != SessionPhase::SegmentTimerRunning {
                    if snapshot.claim_unlocked {
                        info!("final segment complete; claim unlocked");
                    }
                    break;
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn spawn_auto_close(&self) {
        let mut guard = self.closer.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }

        let controller = self.clone();
        let delay = self.timing.claimed_close_delay;
        *guard = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            if let Err(err) = controller.close().await {
                error!("auto-close after claim failed: {err:#}");
            }
        }));
    }

    async fn emit_state(&self) {
        let snapshot = self.state.lock().await.clone();
        self.emitter.session_changed(&snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::{ScriptHandle, ScriptRegistry};
    use crate::rewards::{GrantReceipt, RewardGranter};
    use crate::settings::RewardSettings;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const AD_TAG: &str =
        r#"<script src="https://www.highperformanceformat.com/abc/invoke.js"></script>"#;

    struct FakeRegistry {
        injects: AtomicUsize,
        revokes: AtomicUsize,
        srcs: StdMutex<Vec<String>>,
    }

    impl FakeRegistry {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                injects: AtomicUsize::new(0),
                revokes: AtomicUsize::new(0),
                srcs: StdMutex::new(Vec::new()),
            })
        }
    }

    impl ScriptRegistry for FakeRegistry {
        fn inject(&self, markup: &SanitizedMarkup) -> Result<ScriptHandle> {
            self.injects.fetch_add(1, Ordering::SeqCst);
            self.srcs
                .lock()
                .unwrap()
                .extend(markup.scripts.iter().filter_map(|s| s.src.clone()));
            Ok(ScriptHandle("test".into()))
        }

        fn revoke_all(&self) -> Result<()> {
            self.revokes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeGranter {
        calls: AtomicUsize,
        fail_times: AtomicUsize,
        delay: Duration,
    }

    impl FakeGranter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_times: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn failing(times: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_times: AtomicUsize::new(times),
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_times: AtomicUsize::new(0),
                delay,
            })
        }

        fn failing_slow(times: usize, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_times: AtomicUsize::new(times),
                delay,
            })
        }
    }

    #[async_trait]
    impl RewardGranter for FakeGranter {
        async fn grant(&self, credits: i64) -> Result<GrantReceipt> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }

            let remaining = self.fail_times.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_times.store(remaining - 1, Ordering::SeqCst);
                bail!("insufficient funds");
            }

            Ok(GrantReceipt {
                claim_id: "claim-1".into(),
                new_balance: credits,
            })
        }
    }

    #[derive(Default)]
    struct RecordingEmitter {
        states: StdMutex<Vec<RewardSessionState>>,
        claims: StdMutex<Vec<(i64, i64)>>,
    }

    impl SessionEmitter for RecordingEmitter {
        fn session_changed(&self, state: &RewardSessionState) {
            self.states.lock().unwrap().push(state.clone());
        }

        fn reward_claimed(&self, credits: i64, new_balance: i64) {
            self.claims.lock().unwrap().push((credits, new_balance));
        }
    }

    fn fast_timing() -> SessionTiming {
        SessionTiming {
            tick_interval: Duration::from_millis(10),
            open_delay: Duration::from_millis(1),
            advance_delay: Duration::from_millis(1),
            reinject_delay: Duration::from_millis(1),
            claimed_close_delay: Duration::from_millis(20),
            verify: VerifyConfig {
                poll_interval: Duration::from_millis(2),
                timeout: Duration::from_millis(25),
            },
        }
    }

    fn test_settings(markup: &str, segment_count: u32, segment_secs: u32) -> Arc<SettingsStore> {
        let path =
            std::env::temp_dir().join(format!("adgate-session-{}.json", uuid::Uuid::new_v4()));
        let store = SettingsStore::new(path).unwrap();
        store
            .update_reward(RewardSettings {
                ad_markup: markup.into(),
                segment_count,
                segment_secs,
                reward_credits: 10,
            })
            .unwrap();
        Arc::new(store)
    }

    struct Harness {
        controller: RewardSessionController,
        registry: Arc<FakeRegistry>,
        granter: Arc<FakeGranter>,
        emitter: Arc<RecordingEmitter>,
        prober: Option<JoinHandle<()>>,
    }

    impl Harness {
        fn new(settings: Arc<SettingsStore>, granter: Arc<FakeGranter>) -> Self {
            let registry = FakeRegistry::new();
            let emitter = Arc::new(RecordingEmitter::default());
            let controller = RewardSessionController::with_timing(
                settings,
                registry.clone(),
                granter.clone(),
                emitter.clone(),
                fast_timing(),
            );

            Self {
                controller,
                registry,
                granter,
                emitter,
                prober: None,
            }
        }

        /// Simulates the webview reporting a rendered ad container.
        fn start_probing(&mut self) {
            let controller = self.controller.clone();
            self.prober = Some(tokio::spawn(async move {
                loop {
                    let _ = controller.report_probe(visible_probe()).await;
                    time::sleep(Duration::from_millis(2)).await;
                }
            }));
        }

        async fn wait_for<F>(&self, what: &str, predicate: F) -> RewardSessionState
        where
            F: Fn(&RewardSessionState) -> bool,
        {
            let deadline = time::Instant::now() + Duration::from_secs(2);
            loop {
                let snapshot = self.controller.get_snapshot().await;
                if predicate(&snapshot) {
                    return snapshot;
                }
                if time::Instant::now() > deadline {
                    panic!("timed out waiting for {what}; last state: {snapshot:?}");
                }
                time::sleep(Duration::from_millis(2)).await;
            }
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            if let Some(prober) = self.prober.take() {
                prober.abort();
            }
        }
    }

    fn visible_probe() -> AdProbe {
        AdProbe {
            present: true,
            child_count: 1,
            width: 300.0,
            height: 250.0,
            display: "block".into(),
            visibility: "visible".into(),
            opacity: 1.0,
        }
    }

    #[tokio::test]
    async fn full_session_unlocks_claims_and_auto_closes() {
        let mut harness = Harness::new(test_settings(AD_TAG, 2, 1), FakeGranter::new());
        harness.start_probing();

        harness.controller.open().await.unwrap();
        harness
            .wait_for("segment 1 complete", |s| {
                s.phase == SessionPhase::SegmentComplete
            })
            .await;

        harness.controller.watch_next().await.unwrap();
        let unlocked = harness
            .wait_for("claim unlocked", |s| s.phase == SessionPhase::ClaimUnlocked)
            .await;
        assert!(unlocked.claim_unlocked);
        assert_eq!(unlocked.current_segment, 2);

        let after_claim = harness.controller.claim().await.unwrap();
        assert!(after_claim.claimed);
        assert_eq!(harness.granter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*harness.emitter.claims.lock().unwrap(), vec![(10, 10)]);

        // Claimed state auto-closes shortly after.
        harness
            .wait_for("auto close", |s| s.phase == SessionPhase::Idle)
            .await;
        assert!(harness.registry.revokes.load(Ordering::SeqCst) >= 1);
        assert_eq!(harness.registry.injects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn verification_succeeds_only_on_retry_cycle() {
        let mut harness = Harness::new(test_settings(AD_TAG, 1, 1), FakeGranter::new());

        harness.controller.open().await.unwrap();

        // Let the first verification window expire before the ad renders.
        harness
            .wait_for("first retry", |s| s.retry_count == 1)
            .await;
        assert_eq!(harness.controller.get_snapshot().await.verified, false);

        harness.start_probing();
        let running = harness
            .wait_for("timer running", |s| {
                s.phase == SessionPhase::SegmentTimerRunning
            })
            .await;
        assert!(running.verified);
        assert_eq!(running.retry_count, 0);
        assert_eq!(harness.registry.injects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn blocked_after_retry_budget_exhausted() {
        let harness = Harness::new(test_settings(AD_TAG, 2, 1), FakeGranter::new());

        harness.controller.open().await.unwrap();
        let blocked = harness.wait_for("blocked", |s| s.blocked).await;

        assert!(!blocked.verified);
        assert!(!blocked.claim_unlocked);
        assert_eq!(blocked.retry_count, 1);
        assert_eq!(harness.registry.injects.load(Ordering::SeqCst), 2);

        // Timer never started; nothing to claim.
        time::sleep(Duration::from_millis(40)).await;
        let still = harness.controller.get_snapshot().await;
        assert!(!still.claim_unlocked);
        assert!(harness.controller.claim().await.is_err());
        assert_eq!(harness.granter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_markup_blocks_immediately() {
        let harness = Harness::new(test_settings("", 2, 1), FakeGranter::new());

        harness.controller.open().await.unwrap();
        let blocked = harness.wait_for("blocked", |s| s.blocked).await;

        assert!(!blocked.verified);
        assert_eq!(harness.registry.injects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_claim_can_be_retried_without_rewatching() {
        let mut harness = Harness::new(test_settings(AD_TAG, 1, 1), FakeGranter::failing(1));
        harness.start_probing();

        harness.controller.open().await.unwrap();
        harness
            .wait_for("claim unlocked", |s| s.phase == SessionPhase::ClaimUnlocked)
            .await;

        let failed = harness.controller.claim().await.unwrap();
        assert_eq!(failed.claim_error.as_deref(), Some("insufficient funds"));
        assert!(!failed.claimed);
        assert!(failed.claim_unlocked);

        let retried = harness.controller.claim().await.unwrap();
        assert!(retried.claimed);
        assert!(retried.claim_error.is_none());
        assert_eq!(harness.granter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn duplicate_claim_triggers_invoke_granter_once() {
        let mut harness = Harness::new(
            test_settings(AD_TAG, 1, 1),
            FakeGranter::slow(Duration::from_millis(30)),
        );
        harness.start_probing();

        harness.controller.open().await.unwrap();
        harness
            .wait_for("claim unlocked", |s| s.phase == SessionPhase::ClaimUnlocked)
            .await;

        let first = harness.controller.clone();
        let second = harness.controller.clone();
        let (a, b) = tokio::join!(first.claim(), second.claim());
        a.unwrap();
        b.unwrap();

        assert_eq!(harness.granter.calls.load(Ordering::SeqCst), 1);
        harness
            .wait_for("claimed", |s| {
                s.phase == SessionPhase::Claimed || s.phase == SessionPhase::Idle
            })
            .await;
    }

    #[tokio::test]
    async fn close_mid_countdown_discards_progress() {
        let mut harness = Harness::new(test_settings(AD_TAG, 2, 30), FakeGranter::new());
        harness.start_probing();

        harness.controller.open().await.unwrap();
        harness
            .wait_for("timer running", |s| {
                s.phase == SessionPhase::SegmentTimerRunning
            })
            .await;

        harness.controller.close().await.unwrap();
        let closed = harness.controller.get_snapshot().await;
        assert_eq!(closed, RewardSessionState::default());
        assert!(harness.registry.revokes.load(Ordering::SeqCst) >= 1);

        // No orphaned ticker keeps mutating state after teardown.
        time::sleep(Duration::from_millis(40)).await;
        assert_eq!(
            harness.controller.get_snapshot().await,
            RewardSessionState::default()
        );

        // Reopening starts completely fresh at segment 1.
        let reopened = harness.controller.open().await.unwrap();
        assert_eq!(reopened.current_segment, 1);
        assert!(!reopened.verified);
        assert!(!reopened.claim_unlocked);
    }

    #[tokio::test]
    async fn grant_failing_after_close_preserves_the_reset() {
        let mut harness = Harness::new(
            test_settings(AD_TAG, 1, 1),
            FakeGranter::failing_slow(1, Duration::from_millis(30)),
        );
        harness.start_probing();

        harness.controller.open().await.unwrap();
        harness
            .wait_for("claim unlocked", |s| s.phase == SessionPhase::ClaimUnlocked)
            .await;

        let claimer = harness.controller.clone();
        let claim_task = tokio::spawn(async move { claimer.claim().await });
        harness.wait_for("claim in flight", |s| s.claiming).await;

        harness.controller.close().await.unwrap();
        claim_task.await.unwrap().unwrap();

        // The grant failure resolved against a closed session; nothing of
        // it (phase, claim_error) may leak into the reset state.
        let closed = harness.controller.get_snapshot().await;
        assert_eq!(closed, RewardSessionState::default());

        let reopened = harness.controller.open().await.unwrap();
        assert_eq!(reopened.current_segment, 1);
        assert!(reopened.claim_error.is_none());
    }

    #[tokio::test]
    async fn grant_succeeding_after_close_leaves_session_idle() {
        let mut harness = Harness::new(
            test_settings(AD_TAG, 1, 1),
            FakeGranter::slow(Duration::from_millis(30)),
        );
        harness.start_probing();

        harness.controller.open().await.unwrap();
        harness
            .wait_for("claim unlocked", |s| s.phase == SessionPhase::ClaimUnlocked)
            .await;

        let claimer = harness.controller.clone();
        let claim_task = tokio::spawn(async move { claimer.claim().await });
        harness.wait_for("claim in flight", |s| s.claiming).await;

        harness.controller.close().await.unwrap();
        claim_task.await.unwrap().unwrap();

        // Credits landed, so the balance event still fires, but the closed
        // session is not flipped back to claimed.
        assert_eq!(harness.granter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*harness.emitter.claims.lock().unwrap(), vec![(10, 10)]);
        assert_eq!(
            harness.controller.get_snapshot().await,
            RewardSessionState::default()
        );

        // And no auto-close timer was armed against the idle session.
        time::sleep(Duration::from_millis(40)).await;
        assert_eq!(
            harness.controller.get_snapshot().await,
            RewardSessionState::default()
        );
    }

    #[tokio::test]
    async fn each_injection_gets_a_fresh_cache_buster() {
        let mut harness = Harness::new(test_settings(AD_TAG, 1, 1), FakeGranter::new());

        harness.controller.open().await.unwrap();
        // First verification window expires, forcing a second injection.
        harness
            .wait_for("first retry", |s| s.retry_count == 1)
            .await;
        harness.start_probing();
        harness
            .wait_for("timer running", |s| {
                s.phase == SessionPhase::SegmentTimerRunning
            })
            .await;

        let srcs = harness.registry.srcs.lock().unwrap().clone();
        assert_eq!(srcs.len(), 2);
        for src in &srcs {
            assert!(
                src.starts_with("https://www.highperformanceformat.com/abc/invoke.js?cb="),
                "src: {src}"
            );
        }
        assert_ne!(srcs[0], srcs[1]);
    }

    #[tokio::test]
    async fn open_while_open_is_rejected() {
        let harness = Harness::new(test_settings(AD_TAG, 2, 1), FakeGranter::new());
        harness.controller.open().await.unwrap();
        assert!(harness.controller.open().await.is_err());
    }

    #[tokio::test]
    async fn watch_next_requires_completed_segment() {
        let harness = Harness::new(test_settings(AD_TAG, 2, 1), FakeGranter::new());
        assert!(harness.controller.watch_next().await.is_err());

        harness.controller.open().await.unwrap();
        assert!(harness.controller.watch_next().await.is_err());
    }
}
