use parking_lot::Mutex;

use crate::core::config::PricingConfig;
use crate::core::types::{CostLedger, CostSummary, Strategy};
use crate::services::inference::client::TokenUsage;

/// Per-1000-token rates in USD
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingTable {
    pub input_rate: f64,
    pub output_rate: f64,
}

impl PricingTable {
    pub fn standard(pricing: &PricingConfig) -> Self {
        Self {
            input_rate: pricing.standard_input_rate,
            output_rate: pricing.standard_output_rate,
        }
    }

    pub fn batch(pricing: &PricingConfig) -> Self {
        Self {
            input_rate: pricing.batch_input_rate,
            output_rate: pricing.batch_output_rate,
        }
    }

    /// Batch jobs are billed at the discounted table, synchronous calls at standard
    pub fn for_strategy(strategy: Strategy, pricing: &PricingConfig) -> Self {
        match strategy {
            Strategy::Sequential | Strategy::Concurrent => Self::standard(pricing),
            Strategy::Batch => Self::batch(pricing),
        }
    }
}

pub fn cost(prompt_tokens: u64, completion_tokens: u64, table: &PricingTable) -> f64 {
    (prompt_tokens as f64 / 1000.0) * table.input_rate
        + (completion_tokens as f64 / 1000.0) * table.output_rate
}

/// Running cost totals owned by one analyzer instance.
///
/// Completions may arrive from several tasks at once, so every update goes
/// through the lock; the ledger itself is never handed out.
#[derive(Debug)]
pub struct CostAccountant {
    pricing: PricingTable,
    ledger: Mutex<CostLedger>,
}

impl CostAccountant {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            ledger: Mutex::new(CostLedger::default()),
        }
    }

    pub fn pricing(&self) -> PricingTable {
        self.pricing
    }

    /// Add one successfully analyzed image; returns its cost
    pub fn record(&self, usage: &TokenUsage) -> f64 {
        self.add(usage, 1)
    }

    /// Bill tokens for a result that was paid for but not kept (its post was
    /// dropped). The image does not count towards `processed_count`.
    pub fn charge(&self, usage: &TokenUsage) -> f64 {
        self.add(usage, 0)
    }

    fn add(&self, usage: &TokenUsage, images: u64) -> f64 {
        let item_cost = cost(usage.prompt_tokens, usage.completion_tokens, &self.pricing);
        let mut ledger = self.ledger.lock();
        ledger.processed_count += images;
        ledger.total_tokens += usage.total();
        ledger.total_cost += item_cost;
        item_cost
    }

    pub fn summary(&self) -> CostSummary {
        CostSummary::from(*self.ledger.lock())
    }

    pub fn reset(&self) {
        *self.ledger.lock() = CostLedger::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use std::sync::Arc;

    fn pricing() -> PricingConfig {
        Config::from_lookup(|_| None).unwrap().pricing
    }

    #[test]
    fn test_cost_formula() {
        let table = PricingTable {
            input_rate: 0.01,
            output_rate: 0.03,
        };
        let c = cost(2000, 1000, &table);
        assert!((c - 0.05).abs() < 1e-12);
        assert_eq!(cost(0, 0, &table), 0.0);
    }

    #[test]
    fn test_batch_pricing_is_exactly_half() {
        let pricing = pricing();
        let standard = PricingTable::standard(&pricing);
        let batch = PricingTable::batch(&pricing);

        for (prompt, completion) in [(1, 1), (850, 120), (1234, 567), (99_999, 3), (0, 4096)] {
            let s = cost(prompt, completion, &standard);
            let b = cost(prompt, completion, &batch);
            assert_eq!(b, s * 0.5, "prompt={} completion={}", prompt, completion);
        }
    }

    #[test]
    fn test_table_follows_strategy() {
        let pricing = pricing();
        assert_eq!(
            PricingTable::for_strategy(Strategy::Concurrent, &pricing),
            PricingTable::standard(&pricing)
        );
        assert_eq!(
            PricingTable::for_strategy(Strategy::Batch, &pricing),
            PricingTable::batch(&pricing)
        );
    }

    #[test]
    fn test_ledger_accumulates_and_resets() {
        let accountant = CostAccountant::new(PricingTable {
            input_rate: 1.0,
            output_rate: 2.0,
        });
        let usage = TokenUsage {
            prompt_tokens: 1000,
            completion_tokens: 500,
            total_tokens: 1500,
        };

        assert_eq!(accountant.record(&usage), 2.0);
        accountant.record(&usage);

        let summary = accountant.summary();
        assert_eq!(summary.processed_count, 2);
        assert_eq!(summary.total_tokens, 3000);
        assert_eq!(summary.total_cost, 4.0);
        assert_eq!(summary.average_per_image, 2.0);

        accountant.reset();
        assert_eq!(accountant.summary().processed_count, 0);
    }

    #[test]
    fn test_charge_bills_tokens_without_counting_image() {
        let accountant = CostAccountant::new(PricingTable {
            input_rate: 1.0,
            output_rate: 2.0,
        });
        let usage = TokenUsage {
            prompt_tokens: 1000,
            completion_tokens: 500,
            total_tokens: 1500,
        };

        accountant.record(&usage);
        assert_eq!(accountant.charge(&usage), 2.0);

        let summary = accountant.summary();
        assert_eq!(summary.processed_count, 1);
        assert_eq!(summary.total_tokens, 3000);
        assert_eq!(summary.total_cost, 4.0);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let accountant = Arc::new(CostAccountant::new(PricingTable {
            input_rate: 0.0,
            output_rate: 0.0,
        }));
        let usage = TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        };

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let accountant = accountant.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        accountant.record(&usage);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let summary = accountant.summary();
        assert_eq!(summary.processed_count, 800);
        assert_eq!(summary.total_tokens, 1600);
    }
}
