pub mod controller;
mod loop_worker;
pub mod probe;

pub use controller::{VerifierController, VerifyConfig, VerifyOutcome};
pub use probe::AdProbe;
