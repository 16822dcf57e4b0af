use serde::{Deserialize, Serialize};

/// Price ladder rows as sent on the wire: `[price, size]` or `[level, price, size]`.
pub type Ladder = Vec<Vec<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    SubImage,
    ResubDelta,
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentType {
    SegStart,
    Seg,
    SegEnd,
}

/// `mcm` push. `id` is peer sequencing metadata, not a correlation id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketChangeMessage {
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
    pub mc: Vec<MarketChange>,
}

impl MarketChangeMessage {
    pub fn is_heartbeat(&self) -> bool {
        self.ct == Some(ChangeType::Heartbeat)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketChange {
    pub id: String,
    #[serde(default)]
    pub img: Option<bool>,
    #[serde(default)]
    pub tv: Option<f64>,
    #[serde(default)]
    pub con: Option<bool>,
    #[serde(default)]
    pub rc: Vec<RunnerChange>,
    #[serde(default)]
    pub market_definition: Option<MarketDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerChange {
    pub id: u64,
    #[serde(default)]
    pub hc: Option<f64>,
    #[serde(default)]
    pub ltp: Option<f64>,
    #[serde(default)]
    pub tv: Option<f64>,
    #[serde(default)]
    pub spn: Option<f64>,
    #[serde(default)]
    pub spf: Option<f64>,
    #[serde(default)]
    pub batb: Option<Ladder>,
    #[serde(default)]
    pub batl: Option<Ladder>,
    #[serde(default)]
    pub bdatb: Option<Ladder>,
    #[serde(default)]
    pub bdatl: Option<Ladder>,
    #[serde(default)]
    pub atb: Option<Ladder>,
    #[serde(default)]
    pub atl: Option<Ladder>,
    #[serde(default)]
    pub spb: Option<Ladder>,
    #[serde(default)]
    pub spl: Option<Ladder>,
    #[serde(default)]
    pub trd: Option<Ladder>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDefinition {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event_type_id: Option<String>,
    #[serde(default)]
    pub market_type: Option<String>,
    #[serde(default)]
    pub betting_type: Option<String>,
    #[serde(default)]
    pub market_time: Option<String>,
    #[serde(default)]
    pub open_date: Option<String>,
    #[serde(default)]
    pub suspend_time: Option<String>,
    #[serde(default)]
    pub settled_time: Option<String>,
    #[serde(default)]
    pub bet_delay: Option<u32>,
    #[serde(default)]
    pub in_play: Option<bool>,
    #[serde(default)]
    pub turn_in_play_enabled: Option<bool>,
    #[serde(default)]
    pub bsp_market: Option<bool>,
    #[serde(default)]
    pub bsp_reconciled: Option<bool>,
    #[serde(default)]
    pub cross_matching: Option<bool>,
    #[serde(default)]
    pub runners_voidable: Option<bool>,
    #[serde(default)]
    pub complete: Option<bool>,
    #[serde(default)]
    pub number_of_winners: Option<u32>,
    #[serde(default)]
    pub number_of_active_runners: Option<u32>,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub runners: Vec<RunnerDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerDefinition {
    pub id: u64,
    #[serde(default)]
    pub sort_priority: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub hc: Option<f64>,
    #[serde(default)]
    pub adjustment_factor: Option<f64>,
    #[serde(default)]
    pub bsp: Option<f64>,
    #[serde(default)]
    pub removal_date: Option<String>,
}
