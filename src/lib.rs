mod ads;
mod db;
mod rewards;
mod session;
mod settings;
mod verify;

use std::sync::Arc;

use ads::WebviewScriptRegistry;
use db::Database;
use log::info;
use rewards::{CreditLedger, RewardGranter};
use session::{
    commands::{
        claim_reward, close_reward_session, get_credit_balance, get_reward_session,
        list_reward_claims, open_reward_session, report_ad_probe, watch_next_segment,
    },
    RewardSessionController, TauriSessionEmitter,
};
use settings::{RewardSettings, SettingsStore};
use tauri::{Emitter, Manager, State};

pub(crate) struct AppState {
    pub(crate) ledger: CreditLedger,
    pub(crate) session: RewardSessionController,
    pub(crate) settings: Arc<SettingsStore>,
}

#[tauri::command]
fn get_reward_settings(state: State<AppState>) -> Result<RewardSettings, String> {
    Ok(state.settings.reward())
}

#[tauri::command]
fn set_reward_settings(
    settings: RewardSettings,
    state: State<AppState>,
    app_handle: tauri::AppHandle,
) -> Result<(), String> {
    state
        .settings
        .update_reward(settings.clone())
        .map_err(|e| e.to_string())?;

    app_handle
        .emit("reward-settings-updated", &settings)
        .map_err(|e| e.to_string())?;

    Ok(())
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("adgate starting up...");

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let result = (|| -> anyhow::Result<()> {
                let app_data_dir = app
                    .path()
                    .app_data_dir()
                    .map_err(|err| anyhow::anyhow!(err))?;
                std::fs::create_dir_all(&app_data_dir)?;

                let db_path = app_data_dir.join("adgate.sqlite3");
                let database = Database::new(db_path)?;
                let ledger = CreditLedger::new(database);

                let settings_path = app_data_dir.join("settings.json");
                let settings = Arc::new(SettingsStore::new(settings_path)?);

                let registry = Arc::new(WebviewScriptRegistry::new(app.handle().clone()));
                let emitter = Arc::new(TauriSessionEmitter::new(app.handle().clone()));
                let granter: Arc<dyn RewardGranter> = Arc::new(ledger.clone());

                let session =
                    RewardSessionController::new(settings.clone(), registry, granter, emitter);

                app.manage(AppState {
                    ledger,
                    session,
                    settings,
                });

                Ok(())
            })();

            result.map_err(|err| err.into())
        })
        .invoke_handler(tauri::generate_handler![
            get_reward_session,
            open_reward_session,
            close_reward_session,
            watch_next_segment,
            claim_reward,
            report_ad_probe,
            get_credit_balance,
            list_reward_claims,
            get_reward_settings,
            set_reward_settings,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
