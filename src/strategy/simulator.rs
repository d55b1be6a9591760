//! Trade simulator.
//!
//! Pure, synchronous functions that turn a venue's `PriceState` into the
//! realized output of a hypothetical swap. Dispatches on the curve variant;
//! callers never need to know which liquidity model a venue uses.

use rust_decimal::Decimal;
use web3::types::U256;

use super::{v2_math, v3_math};
use crate::types::{
    Curve, Direction, FeeRate, PriceState, SimulationError, SimulationResult, BPS,
    DECIMAL_MAX_MANTISSA,
};

/// Simulate swapping `amount_in` on `state` in `direction`, paying `fee`.
pub fn simulate(
    state: &PriceState,
    amount_in: U256,
    fee: FeeRate,
    direction: Direction,
) -> Result<SimulationResult, SimulationError> {
    if amount_in.is_zero() {
        return Err(SimulationError::InvalidInput(
            "input amount must be positive".into(),
        ));
    }
    if !fee.is_valid() {
        return Err(SimulationError::InvalidInput(format!(
            "fee {fee} must be below 100%"
        )));
    }

    let amount_out = match &state.curve {
        Curve::ConstantProduct { reserve0, reserve1 } => {
            let (reserve_in, reserve_out) = oriented_reserves(*reserve0, *reserve1, direction);
            v2_math::get_amount_out(amount_in, reserve_in, reserve_out, fee)?
        }
        Curve::Concentrated {
            sqrt_price_x96,
            liquidity,
            tick,
            tick_spacing,
            token0_is_pair_token0,
        } => {
            let zero_for_one = pool_zero_for_one(direction, *token0_is_pair_token0);
            let after_fee = amount_in
                .checked_mul(U256::from(BPS - fee.bps()))
                .ok_or(SimulationError::Overflow("amount_in * fee multiplier"))?
                / U256::from(BPS);
            if after_fee.is_zero() {
                return Err(SimulationError::InvalidInput(format!(
                    "input {amount_in} does not cover the {fee} fee"
                )));
            }
            let bucket = v3_math::tick_bucket(*tick, *tick_spacing)?;
            let (out, _) = v3_math::swap_within_bucket(
                *sqrt_price_x96,
                *liquidity,
                after_fee,
                zero_for_one,
                bucket,
            )?;
            out
        }
    };

    let spot_price = spot_price(state, direction)?;
    let effective_price = ratio(amount_out, amount_in)?;
    let price_impact = if spot_price.is_zero() {
        Decimal::ZERO
    } else {
        Decimal::ONE
            - effective_price
                .checked_div(spot_price)
                .ok_or(SimulationError::Overflow("effective / spot price"))?
    };

    Ok(SimulationResult {
        amount_in,
        amount_out,
        effective_price,
        spot_price,
        price_impact,
    })
}

/// Marginal output per unit of input (raw units, fee excluded) before any
/// trade.
pub fn spot_price(state: &PriceState, direction: Direction) -> Result<Decimal, SimulationError> {
    match &state.curve {
        Curve::ConstantProduct { reserve0, reserve1 } => {
            let (reserve_in, reserve_out) = oriented_reserves(*reserve0, *reserve1, direction);
            if reserve_in.is_zero() || reserve_out.is_zero() {
                return Err(SimulationError::InvalidInput(
                    "reserves must be positive".into(),
                ));
            }
            ratio(reserve_out, reserve_in)
        }
        Curve::Concentrated {
            sqrt_price_x96,
            token0_is_pair_token0,
            ..
        } => {
            if sqrt_price_x96.is_zero() {
                return Err(SimulationError::InvalidInput(
                    "sqrt price must be positive".into(),
                ));
            }
            // Pool price token1/token0 = (√P / Q96)².
            let root = if pool_zero_for_one(direction, *token0_is_pair_token0) {
                ratio(*sqrt_price_x96, v3_math::q96())?
            } else {
                ratio(v3_math::q96(), *sqrt_price_x96)?
            };
            root.checked_mul(root)
                .ok_or(SimulationError::Overflow("spot price square"))
        }
    }
}

/// Quote tokens per whole target token, decimal-adjusted, for an exchange of
/// `quote_amount` against `target_amount` (both raw units).
pub fn unit_price(
    quote_amount: U256,
    quote_decimals: u8,
    target_amount: U256,
    target_decimals: u8,
) -> Result<Decimal, SimulationError> {
    let num = quote_amount
        .checked_mul(U256::exp10(target_decimals as usize))
        .ok_or(SimulationError::Overflow("unit price numerator"))?;
    let den = target_amount
        .checked_mul(U256::exp10(quote_decimals as usize))
        .ok_or(SimulationError::Overflow("unit price denominator"))?;
    ratio(num, den)
}

/// Marginal quote tokens received per whole target token sold, fee
/// excluded. This is the venue's displayed price.
pub fn quote_per_target(
    state: &PriceState,
    quote_decimals: u8,
    target_decimals: u8,
) -> Result<Decimal, SimulationError> {
    let raw = spot_price(state, Direction::OneForZero)?;
    let shift = i32::from(target_decimals) - i32::from(quote_decimals);
    if shift.unsigned_abs() > 28 {
        return Err(SimulationError::Overflow("decimal shift"));
    }
    let step = Decimal::from_i128_with_scale(1, shift.unsigned_abs());
    let scaled = if shift >= 0 {
        raw.checked_div(step)
    } else {
        raw.checked_mul(step)
    };
    scaled.ok_or(SimulationError::Overflow("decimal shift"))
}

/// Simulate the buy leg then feed its entire output into the sell leg.
pub fn round_trip(
    buy_state: &PriceState,
    buy_fee: FeeRate,
    sell_state: &PriceState,
    sell_fee: FeeRate,
    amount_in: U256,
) -> Result<(SimulationResult, SimulationResult), SimulationError> {
    let buy = simulate(buy_state, amount_in, buy_fee, Direction::ZeroForOne)?;
    let sell = simulate(sell_state, buy.amount_out, sell_fee, Direction::OneForZero)?;
    Ok((buy, sell))
}

/// `num / den` as a `Decimal`, keeping as many fractional digits (up to 18)
/// as fit in the mantissa.
pub fn ratio(num: U256, den: U256) -> Result<Decimal, SimulationError> {
    if den.is_zero() {
        return Err(SimulationError::InvalidInput(
            "ratio with zero denominator".into(),
        ));
    }
    for scale in (0..=18u32).rev() {
        let Some(scaled) = num.checked_mul(U256::exp10(scale as usize)) else {
            continue;
        };
        let quotient = scaled / den;
        if quotient <= U256::from(DECIMAL_MAX_MANTISSA) {
            return Ok(Decimal::from_i128_with_scale(
                quotient.as_u128() as i128,
                scale,
            ));
        }
    }
    Err(SimulationError::Overflow("price ratio"))
}

fn oriented_reserves(reserve0: U256, reserve1: U256, direction: Direction) -> (U256, U256) {
    match direction {
        Direction::ZeroForOne => (reserve0, reserve1),
        Direction::OneForZero => (reserve1, reserve0),
    }
}

/// Map a pair-relative direction onto the pool's own token order.
fn pool_zero_for_one(direction: Direction, token0_is_pair_token0: bool) -> bool {
    (direction == Direction::ZeroForOne) == token0_is_pair_token0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn cp(reserve0: u128, reserve1: u128) -> PriceState {
        PriceState::constant_product(U256::from(reserve0), U256::from(reserve1))
    }

    fn concentrated(token0_is_pair_token0: bool) -> PriceState {
        PriceState {
            curve: Curve::Concentrated {
                sqrt_price_x96: v3_math::sqrt_ratio_at_tick(30).unwrap(),
                liquidity: 10u128.pow(24),
                tick: 30,
                tick_spacing: 60,
                token0_is_pair_token0,
            },
            block_number: Some(1),
            observed_at: chrono::Utc::now(),
        }
    }

    const FEE: FeeRate = FeeRate::from_bps(30);

    #[test]
    fn test_zero_input_is_invalid() {
        let result = simulate(&cp(1000, 1000), U256::zero(), FEE, Direction::ZeroForOne);
        assert!(matches!(result, Err(SimulationError::InvalidInput(_))));
    }

    #[test]
    fn test_zero_reserve_in_is_invalid() {
        let result = simulate(&cp(0, 1000), U256::from(10u8), FEE, Direction::ZeroForOne);
        assert!(matches!(result, Err(SimulationError::InvalidInput(_))));
    }

    #[test]
    fn test_fee_at_or_above_one_is_invalid() {
        let result = simulate(
            &cp(1000, 1000),
            U256::from(10u8),
            FeeRate::from_bps(10_000),
            Direction::ZeroForOne,
        );
        assert!(matches!(result, Err(SimulationError::InvalidInput(_))));
    }

    #[test]
    fn test_overflow_surfaces() {
        let huge = U256::MAX / U256::from(4u8);
        let state = PriceState::constant_product(huge, huge);
        let result = simulate(&state, huge, FEE, Direction::ZeroForOne);
        assert!(matches!(result, Err(SimulationError::Overflow(_))));
    }

    #[test]
    fn test_direction_swaps_reserves() {
        let state = cp(1_000_000, 2_000_000);
        let buy = simulate(&state, U256::from(1000u32), FEE, Direction::ZeroForOne).unwrap();
        let sell = simulate(&state, U256::from(1000u32), FEE, Direction::OneForZero).unwrap();
        assert!(buy.amount_out > sell.amount_out);
        assert_eq!(buy.spot_price, dec!(2));
        assert_eq!(sell.spot_price, dec!(0.5));
    }

    #[test]
    fn test_price_impact_grows_with_size() {
        let state = cp(1_000_000, 1_000_000);
        let small = simulate(&state, U256::from(100u32), FEE, Direction::ZeroForOne).unwrap();
        let large = simulate(&state, U256::from(100_000u32), FEE, Direction::ZeroForOne).unwrap();
        assert!(small.price_impact > Decimal::ZERO);
        assert!(large.price_impact > small.price_impact);
        // Fee alone accounts for 0.3%.
        assert!(small.price_impact >= dec!(0.003));
    }

    #[test]
    fn test_round_trip_loses_value_with_fee() {
        let state = cp(10u128.pow(21), 10u128.pow(21));
        let amount = U256::exp10(19);
        let (_, sell) = round_trip(&state, FEE, &state, FEE, amount).unwrap();
        assert!(sell.amount_out < amount);
    }

    #[test]
    fn test_concentrated_orientation_mirrors() {
        let native = concentrated(true);
        let mirrored = concentrated(false);
        let amount = U256::exp10(18);

        let a = simulate(&native, amount, FEE, Direction::ZeroForOne).unwrap();
        let b = simulate(&mirrored, amount, FEE, Direction::OneForZero).unwrap();
        assert_eq!(a.amount_out, b.amount_out);
        assert!(a.spot_price > Decimal::ONE);
        assert!(a.price_impact > Decimal::ZERO);
    }

    #[test]
    fn test_unit_price_adjusts_for_decimals() {
        // 2000 USDC (6 dp) for 1 WETH (18 dp).
        let price = unit_price(U256::from(2_000_000_000u64), 6, U256::exp10(18), 18).unwrap();
        assert_eq!(price, dec!(2000));
        // Same trade with the decimals swapped.
        let price = unit_price(U256::exp10(21), 18, U256::from(500_000u64), 6).unwrap();
        assert_eq!(price, dec!(2000));
    }

    #[test]
    fn test_quote_per_target_reads_like_a_market_price() {
        // 2,000,000 USDC against 1,000 WETH.
        let pool = cp(2_000_000 * 10u128.pow(6), 1_000 * 10u128.pow(18));
        assert_eq!(quote_per_target(&pool, 6, 18).unwrap(), dec!(2000));

        // USDC/WETH 0.05% pool near 2000 USDC per WETH.
        let v3 = PriceState {
            curve: Curve::Concentrated {
                sqrt_price_x96: v3_math::sqrt_ratio_at_tick(200_311).unwrap(),
                liquidity: 10u128.pow(18),
                tick: 200_311,
                tick_spacing: 10,
                token0_is_pair_token0: true,
            },
            block_number: Some(1),
            observed_at: chrono::Utc::now(),
        };
        let price = quote_per_target(&v3, 6, 18).unwrap();
        assert!(price > dec!(1999) && price < dec!(2001), "got {price}");
    }

    #[test]
    fn test_concentrated_dust_input_is_rejected() {
        // One raw unit rounds to nothing once the fee is taken.
        for direction in [Direction::ZeroForOne, Direction::OneForZero] {
            let result = simulate(&concentrated(true), U256::one(), FEE, direction);
            assert!(matches!(result, Err(SimulationError::InvalidInput(_))));
        }
        let result = simulate(&concentrated(true), U256::one(), FeeRate::ZERO, Direction::ZeroForOne);
        assert!(result.is_ok());
    }

    #[test]
    fn test_concentrated_round_trip_loses_value() {
        let state = concentrated(true);
        let amount = U256::exp10(18);
        let (_, sell) = round_trip(&state, FEE, &state, FEE, amount).unwrap();
        assert!(sell.amount_out < amount);
    }

    #[test]
    fn test_ratio_keeps_precision_and_handles_large_values() {
        assert_eq!(ratio(U256::from(1u8), U256::from(3u8)).unwrap().round_dp(6), dec!(0.333333));
        let big = ratio(U256::exp10(40), U256::one()).unwrap_err();
        assert!(matches!(big, SimulationError::Overflow(_)));
        assert_eq!(ratio(U256::exp10(25), U256::one()).unwrap(), Decimal::from_i128_with_scale(10i128.pow(25), 0));
    }

    proptest! {
        #[test]
        fn prop_output_non_decreasing_in_input(
            reserve_in in 1_000u128..10u128.pow(30),
            reserve_out in 1_000u128..10u128.pow(30),
            a in 1u128..10u128.pow(24),
            b in 1u128..10u128.pow(24),
            fee_bps in 0u32..1_000,
        ) {
            let state = cp(reserve_in, reserve_out);
            let fee = FeeRate::from_bps(fee_bps);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let out_lo = simulate(&state, U256::from(lo), fee, Direction::ZeroForOne).unwrap();
            let out_hi = simulate(&state, U256::from(hi), fee, Direction::ZeroForOne).unwrap();
            prop_assert!(out_lo.amount_out <= out_hi.amount_out);
        }

        #[test]
        fn prop_output_non_increasing_in_fee(
            reserve_in in 1_000u128..10u128.pow(30),
            reserve_out in 1_000u128..10u128.pow(30),
            amount in 1u128..10u128.pow(24),
            f1 in 0u32..9_999,
            f2 in 0u32..9_999,
        ) {
            let state = cp(reserve_in, reserve_out);
            let (lo, hi) = if f1 <= f2 { (f1, f2) } else { (f2, f1) };
            let cheap = simulate(&state, U256::from(amount), FeeRate::from_bps(lo), Direction::ZeroForOne).unwrap();
            let dear = simulate(&state, U256::from(amount), FeeRate::from_bps(hi), Direction::ZeroForOne).unwrap();
            prop_assert!(cheap.amount_out >= dear.amount_out);
        }

        #[test]
        fn prop_round_trip_never_gains(
            reserve0 in 10u128.pow(6)..10u128.pow(30),
            reserve1 in 10u128.pow(6)..10u128.pow(30),
            amount in 1u128..10u128.pow(24),
            fee_bps in 1u32..1_000,
        ) {
            let state = cp(reserve0, reserve1);
            let fee = FeeRate::from_bps(fee_bps);
            let amount = U256::from(amount);
            if let Ok((_, sell)) = round_trip(&state, fee, &state, fee, amount) {
                prop_assert!(sell.amount_out < amount);
            }
        }
    }
}
