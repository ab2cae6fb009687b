//! Endpoint catalog and default cadences.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{FlowAlertProcessor, JobDefinition, RawPayloadProcessor, RequestBuilder, ResponseProcessor};

/// Job key → cadence in seconds.
pub type CadenceTable = BTreeMap<String, u64>;

const MARKET_SCOPE: &str = "market";

/// Per-ticker endpoints: (key, path template, limit).
const TICKER_ENDPOINTS: &[(&str, &str, Option<u32>)] = &[
    ("stock_darkpool", "/api/darkpool/{ticker}", None),
    ("etf_exposure", "/api/etfs/{ticker}/exposure", None),
    ("etf_in_outflow", "/api/etfs/{ticker}/in-outflow", None),
    ("market_etf_tide", "/api/market/{ticker}/etf-tide", None),
    ("stock_flow_alerts", "/api/stock/{ticker}/flow-alerts", Some(100)),
    ("stock_flow_per_expiry", "/api/stock/{ticker}/flow-per-expiry", None),
    ("stock_greek_exposure", "/api/stock/{ticker}/greek-exposure", None),
    ("stock_greek_exposure_expiry", "/api/stock/{ticker}/greek-exposure/expiry", None),
    ("stock_greek_exposure_strike", "/api/stock/{ticker}/greek-exposure/strike", None),
    ("stock_greek_flow", "/api/stock/{ticker}/greek-flow", None),
    ("stock_interpolated_iv", "/api/stock/{ticker}/interpolated-iv", None),
    ("stock_iv_rank", "/api/stock/{ticker}/iv-rank", None),
    ("stock_max_pain", "/api/stock/{ticker}/max-pain", None),
    ("stock_net_prem_ticks", "/api/stock/{ticker}/net-prem-ticks", None),
    ("stock_nope", "/api/stock/{ticker}/nope", None),
    ("stock_ohlc_1m", "/api/stock/{ticker}/ohlc/1m", Some(500)),
    ("stock_oi_change", "/api/stock/{ticker}/oi-change", None),
    ("stock_option_chains", "/api/stock/{ticker}/option-chains", None),
    ("stock_option_stock_price_levels", "/api/stock/{ticker}/option/stock-price-levels", None),
    ("stock_options_volume", "/api/stock/{ticker}/options-volume", None),
    ("stock_spot_exposures", "/api/stock/{ticker}/spot-exposures", None),
    ("stock_spot_exposures_strike", "/api/stock/{ticker}/spot-exposures/strike", None),
    ("stock_stock_state", "/api/stock/{ticker}/stock-state", None),
    ("stock_stock_volume_price_levels", "/api/stock/{ticker}/stock-volume-price-levels", None),
    ("stock_volatility_realized", "/api/stock/{ticker}/volatility/realized", None),
    ("stock_volatility_stats", "/api/stock/{ticker}/volatility/stats", None),
    ("stock_volatility_term_structure", "/api/stock/{ticker}/volatility/term-structure", None),
];

/// Market-wide endpoints: (key, path, limit).
const MARKET_ENDPOINTS: &[(&str, &str, Option<u32>)] = &[
    ("market_economic_calendar", "/api/market/economic-calendar", None),
    ("market_market_tide", "/api/market/market-tide", None),
    ("market_oi_change", "/api/market/oi-change", None),
    ("market_top_net_impact", "/api/market/top-net-impact", None),
    ("market_total_options_volume", "/api/market/total-options-volume", Some(100)),
    ("net_flow_expiry", "/api/net-flow/expiry", None),
];

const DEFAULT_CADENCES: &[(u64, &[&str])] = &[
    (120, &["stock_flow_alerts", "stock_ohlc_1m"]),
    (
        300,
        &[
            "stock_flow_per_expiry",
            "stock_greek_exposure",
            "stock_greek_flow",
            "stock_net_prem_ticks",
            "stock_nope",
            "stock_spot_exposures",
            "stock_stock_state",
            "stock_stock_volume_price_levels",
            "stock_darkpool",
            "market_market_tide",
        ],
    ),
    (
        600,
        &[
            "stock_greek_exposure_expiry",
            "stock_greek_exposure_strike",
            "stock_interpolated_iv",
            "stock_oi_change",
            "stock_option_stock_price_levels",
            "stock_options_volume",
            "stock_spot_exposures_strike",
            "stock_volatility_realized",
            "stock_volatility_stats",
            "market_etf_tide",
            "market_top_net_impact",
            "market_total_options_volume",
        ],
    ),
    (
        900,
        &[
            "stock_iv_rank",
            "stock_max_pain",
            "stock_option_chains",
            "stock_volatility_term_structure",
            "etf_exposure",
            "etf_in_outflow",
            "market_oi_change",
            "net_flow_expiry",
        ],
    ),
    (3600, &["market_economic_calendar"]),
];

/// The default cadence for every catalog endpoint.
#[must_use]
pub fn default_cadences() -> CadenceTable {
    DEFAULT_CADENCES
        .iter()
        .flat_map(|(secs, keys)| keys.iter().map(move |k| ((*k).to_string(), *secs)))
        .collect()
}

/// Merge `job=seconds` overrides (comma separated) over `base`.
///
/// A zero cadence removes the job. Malformed entries are skipped with a
/// warning.
#[must_use]
pub fn parse_cadence_overrides(base: CadenceTable, overrides: &str) -> CadenceTable {
    let mut table = base;
    for entry in overrides.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parsed = entry
            .split_once('=')
            .and_then(|(key, secs)| Some((key.trim(), secs.trim().parse::<u64>().ok()?)))
            .filter(|(key, _)| !key.is_empty());
        match parsed {
            Some((key, 0)) => {
                table.remove(key);
            }
            Some((key, secs)) => {
                table.insert(key.to_string(), secs);
            }
            None => tracing::warn!(entry, "Ignoring malformed cadence override"),
        }
    }
    table
}

fn params(limit: Option<u32>) -> Vec<(String, String)> {
    limit
        .map(|l| vec![("limit".to_string(), l.to_string())])
        .unwrap_or_default()
}

fn processor_for(key: &str) -> Arc<dyn ResponseProcessor> {
    if key == "stock_flow_alerts" {
        Arc::new(FlowAlertProcessor)
    } else {
        Arc::new(RawPayloadProcessor)
    }
}

/// Assemble the job catalog. Endpoints without a cadence are left out.
#[must_use]
pub fn build_catalog(cadences: &CadenceTable) -> Vec<JobDefinition> {
    let per_ticker = TICKER_ENDPOINTS.iter().map(|(key, template, limit)| {
        (
            *key,
            RequestBuilder::PerTicker {
                endpoint_key: (*key).to_string(),
                path_template: (*template).to_string(),
                params: params(*limit),
            },
        )
    });
    let market = MARKET_ENDPOINTS.iter().map(|(key, path, limit)| {
        (
            *key,
            RequestBuilder::Static {
                endpoint_key: (*key).to_string(),
                path: (*path).to_string(),
                params: params(*limit),
                scope: Some(MARKET_SCOPE.to_string()),
            },
        )
    });

    per_ticker
        .chain(market)
        .filter_map(|(key, builder)| {
            let secs = *cadences.get(key)?;
            Some(JobDefinition {
                name: key.to_string(),
                cadence: Duration::from_secs(secs),
                builder,
                processor: processor_for(key),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn every_endpoint_has_a_default_cadence() {
        let cadences = default_cadences();
        assert_eq!(cadences.len(), TICKER_ENDPOINTS.len() + MARKET_ENDPOINTS.len());
        assert_eq!(build_catalog(&cadences).len(), cadences.len());
    }

    #[test_case("stock_flow_alerts", 120)]
    #[test_case("market_market_tide", 300)]
    #[test_case("stock_volatility_stats", 600)]
    #[test_case("net_flow_expiry", 900)]
    #[test_case("market_economic_calendar", 3600)]
    fn default_cadence(key: &str, secs: u64) {
        assert_eq!(default_cadences().get(key), Some(&secs));
    }

    #[test]
    fn jobs_without_cadence_are_excluded() {
        let mut cadences = CadenceTable::new();
        cadences.insert("stock_nope".to_string(), 30);
        cadences.insert("not_in_catalog".to_string(), 30);
        let jobs = build_catalog(&cadences);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "stock_nope");
        assert_eq!(jobs[0].cadence, Duration::from_secs(30));
    }

    #[test]
    fn limits_become_query_params() {
        let jobs = build_catalog(&default_cadences());
        let flow = jobs.iter().find(|j| j.name == "stock_flow_alerts").unwrap();
        let spec = flow.requests(&["SPY".to_string()]).remove(0);
        assert_eq!(spec.path, "/api/stock/SPY/flow-alerts");
        assert_eq!(spec.params, vec![("limit".to_string(), "100".to_string())]);

        let tide = jobs.iter().find(|j| j.name == "market_market_tide").unwrap();
        let spec = tide.requests(&["SPY".to_string()]).remove(0);
        assert_eq!(spec.scope.as_deref(), Some("market"));
        assert!(spec.params.is_empty());
    }

    #[test]
    fn overrides_merge_and_remove() {
        let table = parse_cadence_overrides(
            default_cadences(),
            "stock_nope=60, market_economic_calendar=0, bogus, =5, stock_iv_rank=x",
        );
        assert_eq!(table.get("stock_nope"), Some(&60));
        assert!(!table.contains_key("market_economic_calendar"));
        assert_eq!(table.get("stock_iv_rank"), Some(&900));
    }
}
