//! Weighted power-law allocation ranking
//!
//! For each smoothed asset:
//! 1. weighting = configured override, else 1
//! 2. drop weighting <= 0
//! 3. drop assets tagged with an ignored tag, unless they carry an override
//! 4. absolute = (weighting * market_cap)^(1 / nth_root)
//! 5. rank descending, keep the top `top_ranking_count`
//!
//! Output is not normalized; see `normalize_targets`.

use super::config::AllocationConfig;
use super::error::AllocationError;
use super::history::SnapshotHistory;
use super::types::{normalize_symbol, AllocationTarget, SmoothedAsset};
use std::collections::HashMap;

/// Rank smoothed assets into absolute allocations
pub fn rank_allocations(
    assets: &[SmoothedAsset],
    config: &AllocationConfig,
) -> Result<Vec<AllocationTarget>, AllocationError> {
    if !config.nth_root.is_finite() || config.nth_root <= 0.0 {
        return Err(AllocationError::InvalidNthRoot(config.nth_root));
    }

    let overrides: HashMap<String, f64> = config
        .alt_weighting_factors
        .iter()
        .map(|(symbol, weight)| (normalize_symbol(symbol), *weight))
        .collect();
    let exponent = 1.0 / config.nth_root;

    let mut ranked: Vec<AllocationTarget> = assets
        .iter()
        .filter_map(|asset| {
            let base_symbol = asset.base_symbol();
            let override_weight = overrides.get(base_symbol).copied();
            let weighting = override_weight.unwrap_or(1.0);

            if weighting <= 0.0 {
                log::debug!("Skipping {}: weighting {}", base_symbol, weighting);
                return None;
            }

            if override_weight.is_none() && has_ignored_tag(asset, &config.tags_to_ignore) {
                log::debug!("Skipping {}: ignored tag", base_symbol);
                return None;
            }

            let fraction = (weighting.max(0.0) * asset.market_cap).powf(exponent);

            Some(AllocationTarget {
                base_symbol: base_symbol.to_string(),
                fraction,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.fraction
            .total_cmp(&a.fraction)
            .then_with(|| a.base_symbol.cmp(&b.base_symbol))
    });
    ranked.truncate(config.top_ranking_count);

    Ok(ranked)
}

fn has_ignored_tag(asset: &SmoothedAsset, tags_to_ignore: &[String]) -> bool {
    asset.tags.iter().any(|tag| {
        tags_to_ignore
            .iter()
            .any(|pattern| tag.eq_ignore_ascii_case(pattern.trim()))
    })
}

/// Latest smoothed market caps for `quote_symbol`, ranked into absolute
/// allocations
pub async fn balanced_absolute_allocations(
    history: &SnapshotHistory,
    quote_symbol: &str,
    config: &AllocationConfig,
) -> Result<Vec<AllocationTarget>, AllocationError> {
    let assets = history.list_latest(quote_symbol, config.smoothing).await?;
    let ranked = rank_allocations(&assets, config)?;

    log::info!(
        "📊 Ranked {} of {} assets for {} (smoothing {}h, root {})",
        ranked.len(),
        assets.len(),
        quote_symbol,
        config.smoothing,
        config.nth_root
    );

    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::MarketSnapshot;
    use chrono::{TimeZone, Utc};

    fn asset(base: &str, market_cap: f64, tags: &[&str]) -> SmoothedAsset {
        let updated = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let raw = MarketSnapshot::new("USD", base, 1.0, market_cap, tags.iter().copied(), updated)
            .unwrap();
        SmoothedAsset::from_latest(&raw, market_cap, 1)
    }

    fn config(nth_root: f64, top_ranking_count: usize) -> AllocationConfig {
        AllocationConfig {
            smoothing: 24,
            tags_to_ignore: Vec::new(),
            alt_weighting_factors: HashMap::new(),
            nth_root,
            top_ranking_count,
        }
    }

    #[test]
    fn test_override_beats_tag_exclusion() {
        let assets = vec![asset("A", 100.0, &["meme"]), asset("B", 400.0, &[])];
        let mut cfg = config(2.0, 1);
        cfg.tags_to_ignore = vec!["meme".to_string()];
        cfg.alt_weighting_factors.insert("B".to_string(), 2.0);

        let ranked = rank_allocations(&assets, &cfg).unwrap();

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].base_symbol, "B");
        assert!((ranked[0].fraction - 800f64.sqrt()).abs() < 1e-9);
        assert!((ranked[0].fraction - 28.28).abs() < 0.01);
    }

    #[test]
    fn test_tag_match_is_case_insensitive_exact() {
        let assets = vec![
            asset("DOGE", 100.0, &["Meme"]),
            asset("PEPE", 100.0, &["meme-coin"]),
        ];
        let mut cfg = config(1.0, 10);
        cfg.tags_to_ignore = vec!["MEME".to_string()];

        let ranked = rank_allocations(&assets, &cfg).unwrap();

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].base_symbol, "PEPE");
    }

    #[test]
    fn test_override_keeps_tagged_asset() {
        let assets = vec![asset("DOGE", 100.0, &["meme"])];
        let mut cfg = config(1.0, 10);
        cfg.tags_to_ignore = vec!["meme".to_string()];
        cfg.alt_weighting_factors.insert("doge".to_string(), 0.5);

        let ranked = rank_allocations(&assets, &cfg).unwrap();
        assert_eq!(ranked, vec![AllocationTarget { base_symbol: "DOGE".to_string(), fraction: 50.0 }]);
    }

    #[test]
    fn test_non_positive_weight_dropped() {
        let assets = vec![asset("USDT", 1e11, &[]), asset("XRP", 4e10, &[]), asset("BTC", 1e12, &[])];
        let mut cfg = config(1.0, 10);
        cfg.alt_weighting_factors.insert("USDT".to_string(), 0.0);
        cfg.alt_weighting_factors.insert("XRP".to_string(), -1.0);

        let ranked = rank_allocations(&assets, &cfg).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].base_symbol, "BTC");
    }

    #[test]
    fn test_top_ranking_truncation() {
        let assets = vec![
            asset("A", 10.0, &[]),
            asset("B", 50.0, &[]),
            asset("C", 30.0, &[]),
            asset("D", 40.0, &[]),
            asset("E", 20.0, &[]),
        ];

        let ranked = rank_allocations(&assets, &config(1.0, 3)).unwrap();
        let symbols: Vec<_> = ranked.iter().map(|t| t.base_symbol.as_str()).collect();
        assert_eq!(symbols, vec!["B", "D", "C"]);
    }

    #[test]
    fn test_nth_root_flattens_distribution() {
        let assets = vec![asset("BIG", 10_000.0, &[]), asset("SMALL", 100.0, &[])];

        let linear = rank_allocations(&assets, &config(1.0, 10)).unwrap();
        let rooted = rank_allocations(&assets, &config(2.0, 10)).unwrap();

        assert_eq!(linear[0].fraction / linear[1].fraction, 100.0);
        assert!((rooted[0].fraction / rooted[1].fraction - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_nth_root() {
        let assets = vec![asset("BTC", 1.0, &[])];
        assert!(matches!(
            rank_allocations(&assets, &config(0.0, 10)),
            Err(AllocationError::InvalidNthRoot(_))
        ));
        assert!(matches!(
            rank_allocations(&assets, &config(f64::NAN, 10)),
            Err(AllocationError::InvalidNthRoot(_))
        ));
    }

    #[test]
    fn test_ties_ranked_by_symbol() {
        let assets = vec![asset("ZZZ", 100.0, &[]), asset("AAA", 100.0, &[])];
        let ranked = rank_allocations(&assets, &config(1.0, 10)).unwrap();
        assert_eq!(ranked[0].base_symbol, "AAA");
        assert_eq!(ranked[1].base_symbol, "ZZZ");
    }
}
