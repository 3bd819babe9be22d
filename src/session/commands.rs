use tauri::State;

use crate::{
    db::models::AdRewardClaim,
    session::{RewardSessionController, RewardSessionState},
    verify::AdProbe,
};

use crate::AppState;

fn controller_from_state(state: &State<'_, AppState>) -> RewardSessionController {
    state.session.clone()
}

#[tauri::command]
pub async fn get_reward_session(
    state: State<'_, AppState>,
) -> Result<RewardSessionState, String> {
    let controller = controller_from_state(&state);
    Ok(controller.get_snapshot().await)
}

#[tauri::command]
pub async fn open_reward_session(
    state: State<'_, AppState>,
) -> Result<RewardSessionState, String> {
    let controller = controller_from_state(&state);
    controller.open().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn close_reward_session(state: State<'_, AppState>) -> Result<(), String> {
    let controller = controller_from_state(&state);
    controller.close().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn watch_next_segment(
    state: State<'_, AppState>,
) -> Result<RewardSessionState, String> {
    let controller = controller_from_state(&state);
    controller.watch_next().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn claim_reward(state: State<'_, AppState>) -> Result<RewardSessionState, String> {
    let controller = controller_from_state(&state);
    controller.claim().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn report_ad_probe(state: State<'_, AppState>, probe: AdProbe) -> Result<(), String> {
    let controller = controller_from_state(&state);
    controller.report_probe(probe).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_credit_balance(state: State<'_, AppState>) -> Result<i64, String> {
    state.ledger.balance().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn list_reward_claims(
    state: State<'_, AppState>,
    limit: Option<u32>,
) -> Result<Vec<AdRewardClaim>, String> {
    state
        .ledger
        .recent_claims(limit.unwrap_or(50))
        .await
        .map_err(|e| e.to_string())
}
