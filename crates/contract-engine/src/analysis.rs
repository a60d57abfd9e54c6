//! Monte Carlo estimate of how long an accumulator should be held.
//!
//! Every trial walks one simulated price path from a fixed entry spot and
//! records how many ticks survive before the first breach. A target duration
//! `d` wins in that trial when the survival run reaches `d`; otherwise the
//! stake is lost.

use crate::config::MAX_TICKS;
use crate::contract::{compound_profit, GrowthRate};
use crate::{EngineError, Result};
use market_data::{Market, PriceSimulator};
use serde::{Deserialize, Serialize};
use tracing::debug;

const ANALYSIS_ENTRY_SPOT: f64 = 1_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParams {
    pub market: Market,
    pub growth_rate: GrowthRate,
    pub stake: f64,
    pub trials: u32,
    pub max_ticks: u32,
    /// Fixed seed for reproducible runs.
    pub seed: Option<u64>,
}

impl AnalysisParams {
    pub fn new(market: Market, growth_rate: GrowthRate, stake: f64) -> Self {
        Self {
            market,
            growth_rate,
            stake,
            trials: 1_000,
            max_ticks: MAX_TICKS,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub ticks: u32,
    /// Percentage of trials that survived `ticks` ticks.
    pub win_probability: f64,
    pub average_profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationAnalysis {
    pub points: Vec<DurationStats>,
    pub optimal_duration: u32,
    pub max_average_profit: f64,
    pub max_win_probability: f64,
}

pub fn analyze_durations(params: &AnalysisParams) -> Result<DurationAnalysis> {
    if params.trials == 0 || params.max_ticks == 0 {
        return Err(EngineError::InvalidParameters(
            "analysis needs at least one trial and one tick".to_string(),
        ));
    }
    if !params.stake.is_finite() || params.stake <= 0.0 {
        return Err(EngineError::InvalidParameters(format!("stake must be positive, got {}", params.stake)));
    }

    let volatility = params.market.simulated_volatility();
    let simulator = match params.seed {
        Some(seed) => PriceSimulator::with_seed(ANALYSIS_ENTRY_SPOT, volatility, 0.0, seed),
        None => PriceSimulator::new(ANALYSIS_ENTRY_SPOT, volatility, 0.0),
    };
    let mut simulator = simulator.map_err(|e| EngineError::InvalidParameters(e.to_string()))?;

    let margin = params.growth_rate.tolerance_margin();
    let max_ticks = params.max_ticks as usize;
    // survivors[d - 1] counts trials whose run reached d ticks
    let mut survivors = vec![0u32; max_ticks];

    for _ in 0..params.trials {
        simulator.restart();
        let mut last = simulator.current_price();
        let mut run = 0usize;
        while run < max_ticks {
            let price = simulator.next_price();
            if last <= 0.0 || (price - last).abs() / last > margin {
                break;
            }
            last = price;
            run += 1;
        }
        survivors.iter_mut().take(run).for_each(|count| *count += 1);
    }

    let trials = params.trials as f64;
    let points: Vec<DurationStats> = survivors
        .iter()
        .zip(1..=params.max_ticks)
        .map(|(&wins, ticks)| {
            let wins = wins as f64;
            let win_profit = compound_profit(params.stake, params.growth_rate, ticks);
            DurationStats {
                ticks,
                win_probability: wins / trials * 100.0,
                average_profit: (wins * win_profit - (trials - wins) * params.stake) / trials,
            }
        })
        .collect();

    let best = points
        .iter()
        .copied()
        .fold(None::<DurationStats>, |best, point| match best {
            Some(b) if b.average_profit >= point.average_profit => Some(b),
            _ => Some(point),
        });
    let max_win_probability = points.iter().map(|p| p.win_probability).fold(0.0, f64::max);

    let (optimal_duration, max_average_profit) = best
        .map(|b| (b.ticks, b.average_profit))
        .unwrap_or((1, -params.stake));

    debug!(
        "Duration analysis for {} at {}: optimal {} ticks, average profit {:.2}",
        params.market, params.growth_rate, optimal_duration, max_average_profit
    );

    Ok(DurationAnalysis {
        points,
        optimal_duration,
        max_average_profit,
        max_win_probability,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(market: Market, rate: u8, trials: u32) -> AnalysisParams {
        AnalysisParams {
            trials,
            seed: Some(17),
            ..AnalysisParams::new(market, GrowthRate::new(rate).unwrap(), 10.0)
        }
    }

    #[test]
    fn test_one_point_per_duration() {
        let analysis = analyze_durations(&seeded(Market::V10, 3, 200)).unwrap();
        assert_eq!(analysis.points.len(), MAX_TICKS as usize);
        assert_eq!(analysis.points[0].ticks, 1);
        assert_eq!(analysis.points[44].ticks, 45);
    }

    #[test]
    fn test_win_probability_never_increases_with_duration() {
        let analysis = analyze_durations(&seeded(Market::V75, 2, 300)).unwrap();
        assert!(analysis
            .points
            .windows(2)
            .all(|w| w[1].win_probability <= w[0].win_probability));
        assert_eq!(analysis.max_win_probability, analysis.points[0].win_probability);
    }

    #[test]
    fn test_optimal_duration_has_max_profit() {
        let analysis = analyze_durations(&seeded(Market::V25, 5, 300)).unwrap();
        let point = analysis.points[(analysis.optimal_duration - 1) as usize];
        assert_eq!(point.average_profit, analysis.max_average_profit);
        assert!(analysis.points.iter().all(|p| p.average_profit <= analysis.max_average_profit));
    }

    #[test]
    fn test_calm_market_always_survives() {
        // V10 moves at most 0.05% per tick, inside every tolerance margin
        let analysis = analyze_durations(&seeded(Market::V10, 1, 100)).unwrap();
        assert!(analysis.points.iter().all(|p| p.win_probability == 100.0));
        assert_eq!(analysis.optimal_duration, MAX_TICKS);
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let a = analyze_durations(&seeded(Market::V100, 4, 150)).unwrap();
        let b = analyze_durations(&seeded(Market::V100, 4, 150)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_empty_runs() {
        let mut params = seeded(Market::V50, 1, 0);
        assert!(analyze_durations(&params).is_err());
        params.trials = 10;
        params.stake = 0.0;
        assert!(analyze_durations(&params).is_err());
    }
}
