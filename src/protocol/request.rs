use std::fmt;

use serde::{Deserialize, Serialize};

/// Outbound message: an optional correlation id plus an op-tagged body.
///
/// An absent id, or id `0`, is replaced by the dispatcher with the session's next id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(flatten)]
    pub body: RequestBody,
}

impl Request {
    pub fn new(body: RequestBody) -> Self {
        Self { id: None, body }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    /// Caller-chosen id, ignoring the "unset" value zero.
    pub fn assigned_id(&self) -> Option<u32> {
        self.id.filter(|id| *id != 0)
    }

    pub fn op(&self) -> &'static str {
        self.body.op()
    }

    pub fn heartbeat() -> Self {
        Self::new(RequestBody::Heartbeat)
    }

    pub fn authentication(app_key: impl Into<String>, session: impl Into<String>) -> Self {
        Self::new(RequestBody::Authentication(Authentication {
            app_key: app_key.into(),
            session: session.into(),
        }))
    }

    pub fn market_subscription(subscription: MarketSubscription) -> Self {
        Self::new(RequestBody::MarketSubscription(subscription))
    }

    pub fn order_subscription(subscription: OrderSubscription) -> Self {
        Self::new(RequestBody::OrderSubscription(subscription))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RequestBody {
    Heartbeat,
    Authentication(Authentication),
    MarketSubscription(MarketSubscription),
    OrderSubscription(OrderSubscription),
}

impl RequestBody {
    pub fn op(&self) -> &'static str {
        match self {
            RequestBody::Heartbeat => "heartbeat",
            RequestBody::Authentication(_) => "authentication",
            RequestBody::MarketSubscription(_) => "marketSubscription",
            RequestBody::OrderSubscription(_) => "orderSubscription",
        }
    }
}

#[derive(Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    pub app_key: String,
    pub session: String,
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authentication")
            .field("app_key", &self.app_key)
            .field("session", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSubscription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_clk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflate_ms: Option<u64>,
    #[serde(default)]
    pub market_filter: MarketFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_data_filter: Option<MarketDataFilter>,
}

impl MarketSubscription {
    /// Subscribe to the given market ids with the default data filter.
    pub fn markets<I, S>(market_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            market_filter: MarketFilter {
                market_ids: market_ids.into_iter().map(Into::into).collect(),
                ..MarketFilter::default()
            },
            ..Self::default()
        }
    }

    pub fn with_data_filter(mut self, ladder_levels: u32, fields: &[&str]) -> Self {
        self.market_data_filter = Some(MarketDataFilter {
            ladder_levels: Some(ladder_levels),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    /// Resume from a previous subscription's clocks.
    pub fn resume_from(mut self, initial_clk: impl Into<String>, clk: impl Into<String>) -> Self {
        self.initial_clk = Some(initial_clk.into());
        self.clk = Some(clk.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub country_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub betting_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_in_play_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub market_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub venues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub market_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_type_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bsp_market: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub race_types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ladder_levels: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubscription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_filter: Option<OrderFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_clk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflate_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_overall_position: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub customer_strategy_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_matched_by_strategy_ref: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub account_ids: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_rs::JsonValueTrait;

    fn field<'a>(json: &'a str, key: &str) -> Option<sonic_rs::LazyValue<'a>> {
        sonic_rs::get(json, &[key]).ok()
    }

    fn str_field(json: &str, key: &str) -> Option<String> {
        field(json, key).and_then(|v| v.as_str().map(str::to_owned))
    }

    #[test]
    fn heartbeat_serializes_op_and_id() {
        let json = sonic_rs::to_string(&Request::heartbeat().with_id(4)).expect("serialize");
        assert_eq!(str_field(&json, "op").as_deref(), Some("heartbeat"));
        assert_eq!(field(&json, "id").and_then(|v| v.as_u64()), Some(4));
    }

    #[test]
    fn unset_id_is_omitted() {
        let json = sonic_rs::to_string(&Request::heartbeat()).expect("serialize");
        assert!(field(&json, "id").is_none());
    }

    #[test]
    fn authentication_uses_wire_field_names() {
        let json = sonic_rs::to_string(&Request::authentication("key-1", "tok-1").with_id(1))
            .expect("serialize");
        assert_eq!(str_field(&json, "op").as_deref(), Some("authentication"));
        assert_eq!(str_field(&json, "appKey").as_deref(), Some("key-1"));
        assert_eq!(str_field(&json, "session").as_deref(), Some("tok-1"));
    }

    #[test]
    fn market_subscription_carries_filters() {
        let sub = MarketSubscription::markets(["1.23"])
            .with_data_filter(3, &["EX_BEST_OFFERS", "EX_MARKET_DEF"]);
        let json = sonic_rs::to_string(&Request::market_subscription(sub)).expect("serialize");
        assert_eq!(str_field(&json, "op").as_deref(), Some("marketSubscription"));
        let ids = sonic_rs::get(json.as_str(), &["marketFilter", "marketIds"]).expect("market ids");
        assert!(ids.as_raw_str().contains("1.23"));
        let levels = sonic_rs::get(json.as_str(), &["marketDataFilter", "ladderLevels"]).expect("levels");
        assert_eq!(levels.as_u64(), Some(3));
        assert!(field(&json, "heartbeatMs").is_none());
    }

    #[test]
    fn zero_id_counts_as_unset() {
        assert_eq!(Request::heartbeat().with_id(0).assigned_id(), None);
        assert_eq!(Request::heartbeat().with_id(9).assigned_id(), Some(9));
    }

    #[test]
    fn debug_output_hides_session_token() {
        let rendered = format!("{:?}", Request::authentication("key", "very-secret"));
        assert!(!rendered.contains("very-secret"));
    }
}
