use serde::{Deserialize, Serialize};

use super::market::{ChangeType, Ladder, SegmentType};

/// `ocm` push. `id` is peer sequencing metadata, not a correlation id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderChangeMessage {
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub ct: Option<ChangeType>,
    #[serde(default)]
    pub clk: Option<String>,
    #[serde(default)]
    pub initial_clk: Option<String>,
    #[serde(default)]
    pub pt: Option<u64>,
    #[serde(default)]
    pub heartbeat_ms: Option<u64>,
    #[serde(default)]
    pub conflate_ms: Option<u64>,
    #[serde(default)]
    pub segment_type: Option<SegmentType>,
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(default)]
    pub oc: Vec<OrderMarketChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMarketChange {
    pub id: String,
    #[serde(default)]
    pub account_id: Option<u64>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub full_image: Option<bool>,
    #[serde(default)]
    pub orc: Vec<OrderRunnerChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRunnerChange {
    pub id: u64,
    #[serde(default)]
    pub hc: Option<f64>,
    #[serde(default)]
    pub full_image: Option<bool>,
    #[serde(default)]
    pub uo: Vec<UnmatchedOrder>,
    /// Matched backs, `[price, size]`.
    #[serde(default)]
    pub mb: Option<Ladder>,
    /// Matched lays, `[price, size]`.
    #[serde(default)]
    pub ml: Option<Ladder>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedOrder {
    pub id: String,
    #[serde(default)]
    pub p: Option<f64>,
    #[serde(default)]
    pub s: Option<f64>,
    #[serde(default)]
    pub bsp: Option<f64>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub pt: Option<String>,
    #[serde(default)]
    pub ot: Option<String>,
    #[serde(default)]
    pub pd: Option<u64>,
    #[serde(default)]
    pub md: Option<u64>,
    #[serde(default)]
    pub cd: Option<u64>,
    #[serde(default)]
    pub ld: Option<u64>,
    #[serde(default)]
    pub avp: Option<f64>,
    #[serde(default)]
    pub sm: Option<f64>,
    #[serde(default)]
    pub sr: Option<f64>,
    #[serde(default)]
    pub sl: Option<f64>,
    #[serde(default)]
    pub sc: Option<f64>,
    #[serde(default)]
    pub sv: Option<f64>,
    #[serde(default)]
    pub rac: Option<String>,
    #[serde(default)]
    pub rc: Option<String>,
    #[serde(default)]
    pub rfo: Option<String>,
    #[serde(default)]
    pub rfs: Option<String>,
}
