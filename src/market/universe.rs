//! Universe selection: metadata rows → store records.

use anyhow::Result;
use serde_json::Value;

use crate::db::repo::MarketRow;
use crate::market::gamma::GammaClient;

fn f64_field(m: &Value, camel: &str, snake: &str) -> f64 {
    m.get(camel)
        .or_else(|| m.get(snake))
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(0.0)
}

/// Fetch the top markets by the configured order field and map them into
/// universe rows. Rows without a condition id are dropped; the result is
/// re-sorted by liquidity and truncated defensively against server ordering.
pub async fn fetch_top_liquidity_markets(
    gamma: &GammaClient,
    limit: usize,
    order_field: &str,
    ascending: bool,
    only_active: bool,
    only_open: bool,
) -> Result<Vec<MarketRow>> {
    let active = only_active.then_some(true);
    let closed = only_open.then_some(false);
    let markets = gamma
        .get_markets(limit, 0, active, closed, order_field, ascending)
        .await?;

    let mut out: Vec<MarketRow> = Vec::with_capacity(markets.len());
    for m in &markets {
        let condition_id = m
            .get("conditionId")
            .or_else(|| m.get("condition_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let Some(condition_id) = condition_id else {
            continue;
        };
        let clob_token_ids = m
            .get("clobTokenIds")
            .or_else(|| m.get("clob_token_ids"))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        out.push(MarketRow {
            condition_id,
            market_id: m.get("id").map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            question: m.get("question").and_then(|v| v.as_str()).map(str::to_string),
            slug: m.get("slug").and_then(|v| v.as_str()).map(str::to_string),
            liquidity_num: f64_field(m, "liquidityNum", "liquidity_num"),
            volume_num: f64_field(m, "volumeNum", "volume_num"),
            active: m.get("active").and_then(|v| v.as_bool()).unwrap_or(false),
            closed: m.get("closed").and_then(|v| v.as_bool()).unwrap_or(false),
            accepting_orders: m
                .get("acceptingOrders")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            clob_token_ids,
        });
    }
    out.sort_by(|a, b| b.liquidity_num.total_cmp(&a.liquidity_num));
    out.truncate(limit);
    Ok(out)
}

/// Extract (YES, NO) token ids from the stored `clob_token_ids` column.
/// Accepts a JSON array string, a real JSON array, or a comma-separated list.
pub fn parse_clob_token_ids(raw: &str) -> Option<(String, String)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with('[') {
        if let Ok(Value::Array(arr)) = serde_json::from_str::<Value>(raw) {
            let ids: Vec<String> = arr
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect();
            if ids.len() >= 2 {
                return Some((ids[0].clone(), ids[1].clone()));
            }
        }
        return None;
    }
    let parts: Vec<&str> = raw
        .split(',')
        .map(|p| p.trim().trim_matches('"'))
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() >= 2 {
        return Some((parts[0].to_string(), parts[1].to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array_string() {
        let t = parse_clob_token_ids("[\"111\", \"222\"]").unwrap();
        assert_eq!(t, ("111".to_string(), "222".to_string()));
    }

    #[test]
    fn test_parse_comma_list() {
        let t = parse_clob_token_ids("111, \"222\"").unwrap();
        assert_eq!(t, ("111".to_string(), "222".to_string()));
    }

    #[test]
    fn test_parse_rejects_short() {
        assert!(parse_clob_token_ids("[\"only-one\"]").is_none());
        assert!(parse_clob_token_ids("").is_none());
        assert!(parse_clob_token_ids("solo").is_none());
    }
}
