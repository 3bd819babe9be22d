pub mod allowlist;
pub mod registry;
pub mod sanitize;

pub use registry::{ScriptHandle, ScriptRegistry, WebviewScriptRegistry};
pub use sanitize::{sanitize_markup, SanitizedMarkup, ScriptSpec};
