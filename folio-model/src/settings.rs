use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::metadata::Visibility;

/// Library-wide settings document.
///
/// Unknown keys are preserved in `extra` so collaborators can stash their own
/// preferences without a schema change here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Visibility applied to records the engine creates on its own
    /// (watcher detections, reconciliation healing).
    #[serde(default)]
    pub default_visibility: Visibility,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_unknown_keys() {
        let raw = r##"{"title":"Portfolio","accent":"#ff0000"}"##;
        let settings: LibrarySettings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.title.as_deref(), Some("Portfolio"));
        assert_eq!(settings.default_visibility, Visibility::Public);
        assert_eq!(settings.extra["accent"], "#ff0000");

        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["accent"], "#ff0000");
    }
}
