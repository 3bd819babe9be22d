pub mod commands;
pub mod controller;
pub mod events;
pub mod state;

pub use controller::{RewardSessionController, SessionTiming};
pub use events::{SessionEmitter, TauriSessionEmitter};
pub use state::{RewardSessionState, SessionPhase};
