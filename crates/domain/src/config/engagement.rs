use serde::{Deserialize, Serialize};

/// Engagement-detection knobs (spec §4.2): the proceed-phrase list is
/// ambient config the Planner/SpecGenerator both consume via
/// `annotate_messages` (`relay-domain::conversation`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementConfig {
    #[serde(default = "d_proceed_phrases")]
    pub proceed_phrases: Vec<String>,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            proceed_phrases: d_proceed_phrases(),
        }
    }
}

fn d_proceed_phrases() -> Vec<String> {
    [
        "please proceed",
        "go ahead",
        "sounds good, proceed",
        "lgtm, go for it",
        "yes, please generate the spec",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
