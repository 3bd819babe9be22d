use log::error;
use serde::Serialize;
use tauri::{AppHandle, Emitter};

use super::state::RewardSessionState;

/// Where session snapshots go. The production implementation pushes Tauri
/// events to the webview; tests record them instead.
pub trait SessionEmitter: Send + Sync {
    fn session_changed(&self, state: &RewardSessionState);
    fn reward_claimed(&self, credits: i64, new_balance: i64);
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct SessionChangedEvent<'a> {
    state: &'a RewardSessionState,
    progress_secs: u32,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct RewardClaimedEvent {
    credits: i64,
    new_balance: i64,
}

pub struct TauriSessionEmitter {
    app_handle: AppHandle,
}

impl TauriSessionEmitter {
    pub fn new(app_handle: AppHandle) -> Self {
        Self { app_handle }
    }
}

impl SessionEmitter for TauriSessionEmitter {
    fn session_changed(&self, state: &RewardSessionState) {
        let payload = SessionChangedEvent {
            progress_secs: state.progress_secs(),
            state,
        };
        if let Err(err) = self.app_handle.emit("reward-session-changed", payload) {
            error!("failed to emit reward-session-changed: {err}");
        }
    }

    fn reward_claimed(&self, credits: i64, new_balance: i64) {
        let payload = RewardClaimedEvent {
            credits,
            new_balance,
        };
        if let Err(err) = self.app_handle.emit("reward-claimed", payload) {
            error!("failed to emit reward-claimed: {err}");
        }
    }
}
