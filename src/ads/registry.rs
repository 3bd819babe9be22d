use std::sync::Mutex;

use anyhow::{anyhow, Result};
use log::info;
use serde::Serialize;
use tauri::{AppHandle, Emitter};
use uuid::Uuid;

use super::sanitize::SanitizedMarkup;

/// Identifies one batch of injected ad scripts, so it can be revoked later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptHandle(pub String);

impl ScriptHandle {
    fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// The only component allowed to add or remove ad-network scripts on the
/// page. Injection always revokes lingering batches first, so two
/// injections in sequence never leave duplicate ad scripts behind.
pub trait ScriptRegistry: Send + Sync {
    fn inject(&self, markup: &SanitizedMarkup) -> Result<ScriptHandle>;
    fn revoke_all(&self) -> Result<()>;
}

#[derive(Serialize, Clone)]
struct ScriptsInjectEvent<'a> {
    handle: &'a ScriptHandle,
    markup: &'a SanitizedMarkup,
}

#[derive(Serialize, Clone)]
struct ScriptsRevokeEvent {
    handles: Vec<ScriptHandle>,
}

/// Drives the webview: the frontend listens for `ad-scripts-inject` /
/// `ad-scripts-revoke` and applies them to the ad container and
/// `document.body`. It only ever receives markup that already passed
/// sanitization, so it needs no policy of its own.
pub struct WebviewScriptRegistry {
    app_handle: AppHandle,
    live: Mutex<Vec<ScriptHandle>>,
}

impl WebviewScriptRegistry {
    pub fn new(app_handle: AppHandle) -> Self {
        Self {
            app_handle,
            live: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptRegistry for WebviewScriptRegistry {
    fn inject(&self, markup: &SanitizedMarkup) -> Result<ScriptHandle> {
        self.revoke_all()?;

        let handle = ScriptHandle::new();
        self.app_handle
            .emit(
                "ad-scripts-inject",
                ScriptsInjectEvent {
                    handle: &handle,
                    markup,
                },
            )
            .map_err(|err| anyhow!("failed to emit ad-scripts-inject: {err}"))?;

        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle.clone());

        info!(
            "injected ad batch {} ({} script(s))",
            handle.0,
            markup.scripts.len()
        );
        Ok(handle)
    }

    fn revoke_all(&self) -> Result<()> {
        let handles: Vec<ScriptHandle> = {
            let mut live = self
                .live
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            live.drain(..).collect()
        };

        if handles.is_empty() {
            return Ok(());
        }

        info!("revoking {} ad batch(es)", handles.len());
        self.app_handle
            .emit("ad-scripts-revoke", ScriptsRevokeEvent { handles })
            .map_err(|err| anyhow!("failed to emit ad-scripts-revoke: {err}"))
    }
}
