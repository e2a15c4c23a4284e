use serde::{Deserialize, Serialize};

/// SpecStore knobs (spec §4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecStoreConfig {
    #[serde(default = "d_root")]
    pub root: String,
    #[serde(default = "d_max_bytes")]
    pub max_content_bytes: usize,
}

impl Default for SpecStoreConfig {
    fn default() -> Self {
        Self {
            root: d_root(),
            max_content_bytes: d_max_bytes(),
        }
    }
}

fn d_root() -> String {
    "./specs".to_string()
}
fn d_max_bytes() -> usize {
    200_000
}
