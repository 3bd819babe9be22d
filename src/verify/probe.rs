use serde::{Deserialize, Serialize};

/// An ad slot narrower or shorter than this is treated as collapsed.
pub const MIN_AD_DIMENSION_PX: f64 = 10.0;

/// Layout snapshot of the ad container, reported by the webview. The ad SDK
/// gives no completion callback, so visibility has to be inferred from
/// layout on the reporting side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdProbe {
    /// Whether the container element exists in the DOM at all.
    pub present: bool,
    pub child_count: u32,
    pub width: f64,
    pub height: f64,
    pub display: String,
    pub visibility: String,
    pub opacity: f64,
}

impl AdProbe {
    pub fn is_visible(&self) -> bool {
        self.present
            && self.child_count > 0
            && self.width >= MIN_AD_DIMENSION_PX
            && self.height >= MIN_AD_DIMENSION_PX
            && self.display != "none"
            && self.visibility != "hidden"
            && self.opacity != 0.0
    }
}
