//! Gas price and gas limit policy.
//!
//! The effective gas price is the node-reported price scaled by a
//! per-destination multiplier and clamped into `[1 gwei, max_gas_price]`.
//! The effective gas limit is the node estimate scaled by the limit
//! multiplier, never below the caller's recommended floor. For S->M
//! `postIncomingMessages` the floor grows linearly with the batch size.

use crate::config::GasConfig;

/// Lower clamp for the effective gas price, 1 gwei.
pub const MIN_GAS_PRICE_WEI: u128 = 1_000_000_000;

/// Expected gas per relayed message in `postIncomingMessages`.
pub const POST_MESSAGE_GAS_PER_MESSAGE: u64 = 1_000_000;

/// Fixed `postIncomingMessages` overhead on top of the per-message cost.
pub const POST_MESSAGE_GAS_OVERHEAD: u64 = 200_000;

/// Policy for one destination chain.
#[derive(Debug, Clone, Copy)]
pub struct GasPolicy {
    pub price_multiplier: f64,
    pub limit_multiplier: f64,
    pub max_gas_price: u128,
}

impl GasPolicy {
    /// Policy for mainnet destinations.
    pub fn mainnet(config: &GasConfig) -> Self {
        Self {
            price_multiplier: config.price_multiplier_mainnet,
            limit_multiplier: config.gas_multiplier,
            max_gas_price: config.max_gas_price,
        }
    }

    /// Policy for S-chain destinations.
    pub fn schain(config: &GasConfig) -> Self {
        Self {
            price_multiplier: config.price_multiplier_schain,
            limit_multiplier: config.gas_multiplier,
            max_gas_price: config.max_gas_price,
        }
    }

    /// Effective gas price for a node-reported `raw` price in wei. A zero
    /// report (free-gas S-chains) is lifted to the 1 gwei floor first.
    pub fn effective_gas_price(&self, raw: u128) -> u128 {
        let raw = raw.max(MIN_GAS_PRICE_WEI);
        let scaled = (raw as f64 * self.price_multiplier) as u128;
        scaled.clamp(MIN_GAS_PRICE_WEI, self.max_gas_price)
    }

    /// Effective gas limit for a node `estimate`, never below `floor`.
    /// A zero estimate (the node refused to estimate) yields the floor.
    pub fn effective_gas_limit(&self, estimate: u64, floor: u64) -> u64 {
        let scaled = (estimate as f64 * self.limit_multiplier) as u64;
        scaled.max(floor)
    }
}

/// Recommended gas floor for a `postIncomingMessages` batch of `n` messages.
pub fn post_incoming_messages_floor(n: usize) -> u64 {
    POST_MESSAGE_GAS_PER_MESSAGE
        .saturating_mul(n as u64)
        .saturating_add(POST_MESSAGE_GAS_OVERHEAD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GasConfig;

    fn policy(price_multiplier: f64) -> GasPolicy {
        GasPolicy {
            price_multiplier,
            limit_multiplier: 1.2,
            max_gas_price: 200_000_000_000,
        }
    }

    /// What is tested: a zero node price is lifted to the 1 gwei floor
    /// Why: free-gas S-chains report 0 and a zero-priced transaction is
    /// rejected by the pool
    #[test]
    fn zero_price_gets_floor() {
        assert_eq!(policy(1.0).effective_gas_price(0), MIN_GAS_PRICE_WEI);
    }

    /// What is tested: the multiplier is applied before the ceiling clamp
    /// Why: the ceiling bounds the worst-case spend even under a spiking
    /// node-reported price
    #[test]
    fn price_is_multiplied_then_clamped() {
        let p = policy(1.25);
        assert_eq!(p.effective_gas_price(100_000_000_000), 125_000_000_000);
        assert_eq!(p.effective_gas_price(400_000_000_000), 200_000_000_000);
    }

    /// What is tested: a zero estimate yields exactly the recommended floor
    /// Why: boundary behavior - the node refusing to estimate must not
    /// produce a zero gas limit
    #[test]
    fn zero_estimate_gets_floor() {
        assert_eq!(policy(1.0).effective_gas_limit(0, 3_000_000), 3_000_000);
    }

    /// What is tested: large estimates beat the floor after scaling
    /// Why: the floor is a lower bound, not a cap
    #[test]
    fn estimate_scales_above_floor() {
        assert_eq!(policy(1.0).effective_gas_limit(5_000_000, 3_000_000), 6_000_000);
    }

    /// What is tested: the postIncomingMessages floor formula
    /// Why: the per-message and overhead constants are part of the
    /// submission contract for S->M batches
    #[test]
    fn post_floor_formula() {
        assert_eq!(post_incoming_messages_floor(0), 200_000);
        assert_eq!(post_incoming_messages_floor(5), 5_200_000);
    }

    /// What is tested: the mainnet and S-chain constructors pick their
    /// respective multipliers from the configuration
    /// Why: mainnet submissions pay a premium, S-chain submissions do not
    #[test]
    fn per_destination_multipliers() {
        let config = GasConfig::default();
        assert_eq!(GasPolicy::mainnet(&config).price_multiplier, 1.25);
        assert_eq!(GasPolicy::schain(&config).price_multiplier, 1.0);
    }
}
