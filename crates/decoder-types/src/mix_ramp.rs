use serde::{Deserialize, Serialize};

/// MixRamp crossfade hints emitted by a decoder plugin.
///
/// Both values are kept in their textual `"<dB> <seconds>;..."` form; the
/// mixer parses them when it actually crossfades.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixRampInfo {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl MixRampInfo {
    pub fn is_defined(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}
