//! Uniswap V3 concentrated-liquidity math for swaps inside one tick range.
//!
//! Only the liquidity of the current tick-spacing bucket is known from
//! `slot0()`/`liquidity()`, so swaps that would move the price out of that
//! bucket are rejected instead of extrapolated. Rounding always goes
//! against the trader, as in `SqrtPriceMath`.

use web3::types::U256;

use crate::types::SimulationError;

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

/// `getSqrtRatioAtTick(MIN_TICK)`
pub const MIN_SQRT_RATIO: u64 = 4_295_128_739;

/// Q64.96 fixed-point one.
pub fn q96() -> U256 {
    U256::one() << 96
}

/// `TickMath` multipliers for bits 1..=19 of |tick| (bit 0 seeds the ratio).
const TICK_BIT0: u128 = 0xfffcb933bd6fad37aa2d162d1a594001;
const TICK_MULTIPLIERS: [u128; 19] = [
    0xfff97272373d413259a46990580e213a,
    0xfff2e50f5f656932ef12357cf3c7fdcc,
    0xffe5caca7e10e4e61c3624eaa0941cd0,
    0xffcb9843d60f6159c9db58835c926644,
    0xff973b41fa98c081472e6896dfb254c0,
    0xff2ea16466c96a3843ec78b326b52861,
    0xfe5dee046a99a2a811c461f1969c3053,
    0xfcbe86c7900a88aedcffc83b479aa3a4,
    0xf987a7253ac413176f2b074cf7815e54,
    0xf3392b0822b70005940c7a398e4b70f3,
    0xe7159475a2c29b7443b29c7fa6e889d9,
    0xd097f3bdfd2022b8845ad8f792aa5825,
    0xa9f746462d870fdf8a65dc1f90e061e5,
    0x70d869a156d2a1b890bb3df62baf32f7,
    0x31be135f97d08fd981231505542fcfa6,
    0x9aa508b5b7a84e1c677de54f3e99bc9,
    0x5d6af8dedb81196699c329225ee604,
    0x2216e584f5fa1ea926041bedfe98,
    0x48a170391f7dc42444e8fa2,
];

/// `sqrt(1.0001^tick) · 2^96`, bit-exact with `TickMath.getSqrtRatioAtTick`.
pub fn sqrt_ratio_at_tick(tick: i32) -> Result<U256, SimulationError> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(SimulationError::InvalidInput(format!(
            "tick {tick} outside [{MIN_TICK}, {MAX_TICK}]"
        )));
    }
    let abs_tick = tick.unsigned_abs();

    let mut ratio = if abs_tick & 1 != 0 {
        U256::from(TICK_BIT0)
    } else {
        U256::one() << 128
    };
    for (bit, multiplier) in TICK_MULTIPLIERS.iter().enumerate() {
        if abs_tick & (1 << (bit + 1)) != 0 {
            ratio = (ratio * U256::from(*multiplier)) >> 128;
        }
    }
    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Q128.128 → Q64.96, rounding up.
    let round_up = if (ratio & U256::from(u32::MAX)).is_zero() { 0u8 } else { 1u8 };
    Ok((ratio >> 32) + U256::from(round_up))
}

/// Bounds of the tick-spacing bucket containing `tick`.
pub fn tick_bucket(tick: i32, tick_spacing: i32) -> Result<(i32, i32), SimulationError> {
    if tick_spacing <= 0 {
        return Err(SimulationError::InvalidInput(format!(
            "tick spacing must be positive, got {tick_spacing}"
        )));
    }
    let lower = tick.div_euclid(tick_spacing) * tick_spacing;
    let upper = lower + tick_spacing;
    Ok((lower.max(MIN_TICK), upper.min(MAX_TICK)))
}

fn div_rounding_up(numerator: U256, denominator: U256) -> U256 {
    let (quotient, remainder) = numerator.div_mod(denominator);
    if remainder.is_zero() {
        quotient
    } else {
        quotient + U256::one()
    }
}

/// Swap `amount_in` (already net of fee) inside the active bucket.
///
/// Returns `(amount_out, sqrt_price_after)`. `zero_for_one` is in the
/// pool's own token orientation.
pub fn swap_within_bucket(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount_in: U256,
    zero_for_one: bool,
    bucket: (i32, i32),
) -> Result<(U256, U256), SimulationError> {
    if liquidity == 0 {
        return Err(SimulationError::InvalidInput(
            "no active liquidity in range".into(),
        ));
    }
    if sqrt_price_x96.is_zero() {
        return Err(SimulationError::InvalidInput(
            "sqrt price must be positive".into(),
        ));
    }
    if amount_in.is_zero() {
        return Err(SimulationError::InvalidInput(
            "input amount must be positive".into(),
        ));
    }

    let liquidity = U256::from(liquidity);
    let numerator = liquidity << 96;

    if zero_for_one {
        // √P' = ⌈L·Q96 / (L·Q96/√P + Δx)⌉
        let denominator = (numerator / sqrt_price_x96)
            .checked_add(amount_in)
            .ok_or(SimulationError::Overflow("L/sqrtP + amount_in"))?;
        let next = div_rounding_up(numerator, denominator);

        let lower = sqrt_ratio_at_tick(bucket.0)?;
        if next < lower {
            return Err(SimulationError::InvalidInput(format!(
                "swap moves price below tick {} (outside the active range)",
                bucket.0
            )));
        }

        // Δy = ⌊L·(√P − √P') / Q96⌋
        let delta = sqrt_price_x96
            .checked_sub(next)
            .ok_or(SimulationError::Overflow("sqrt price delta"))?;
        let amount_out = liquidity
            .checked_mul(delta)
            .ok_or(SimulationError::Overflow("L * sqrt price delta"))?
            >> 96;
        Ok((amount_out, next))
    } else {
        // √P' = √P + ⌊Δy·Q96 / L⌋
        let delta = amount_in
            .checked_mul(q96())
            .ok_or(SimulationError::Overflow("amount_in * Q96"))?
            / liquidity;
        let next = sqrt_price_x96
            .checked_add(delta)
            .ok_or(SimulationError::Overflow("sqrt price + delta"))?;

        let upper = sqrt_ratio_at_tick(bucket.1)?;
        if next > upper {
            return Err(SimulationError::InvalidInput(format!(
                "swap moves price above tick {} (outside the active range)",
                bucket.1
            )));
        }

        // Δx = ⌊L·Q96/√P⌋ − ⌈L·Q96/√P'⌉
        let amount_out =
            (numerator / sqrt_price_x96).saturating_sub(div_rounding_up(numerator, next));
        Ok((amount_out, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqrt_ratio_at_tick_zero_is_one() {
        assert_eq!(sqrt_ratio_at_tick(0).unwrap(), q96());
    }

    #[test]
    fn test_sqrt_ratio_at_min_tick() {
        assert_eq!(
            sqrt_ratio_at_tick(MIN_TICK).unwrap(),
            U256::from(MIN_SQRT_RATIO)
        );
    }

    #[test]
    fn test_sqrt_ratio_is_monotonic() {
        let ticks = [-200_000, -60, -1, 0, 1, 60, 200_000];
        let ratios: Vec<U256> = ticks.iter().map(|t| sqrt_ratio_at_tick(*t).unwrap()).collect();
        assert!(ratios.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_sqrt_ratio_rejects_out_of_range_tick() {
        assert!(sqrt_ratio_at_tick(MAX_TICK + 1).is_err());
        assert!(sqrt_ratio_at_tick(MIN_TICK - 1).is_err());
    }

    #[test]
    fn test_tick_bucket_floors_negative_ticks() {
        assert_eq!(tick_bucket(30, 60).unwrap(), (0, 60));
        assert_eq!(tick_bucket(-1, 60).unwrap(), (-60, 0));
        assert_eq!(tick_bucket(-60, 60).unwrap(), (-60, 0));
        assert!(tick_bucket(0, 0).is_err());
    }

    fn mid_bucket_price() -> U256 {
        sqrt_ratio_at_tick(30).unwrap()
    }

    #[test]
    fn test_small_swaps_in_both_directions() {
        let liquidity = 10u128.pow(24);
        let amount = U256::exp10(18);
        let sqrt_p = mid_bucket_price();

        let (out_down, next_down) =
            swap_within_bucket(sqrt_p, liquidity, amount, true, (0, 60)).unwrap();
        assert!(next_down < sqrt_p);
        // price ≈ 1.003: slightly more than one token1 per token0, minus impact
        assert!(out_down > U256::zero() && out_down < U256::exp10(18) * U256::from(2u8));

        let (out_up, next_up) =
            swap_within_bucket(sqrt_p, liquidity, amount, false, (0, 60)).unwrap();
        assert!(next_up > sqrt_p);
        assert!(out_up > U256::zero() && out_up < amount);
    }

    #[test]
    fn test_swap_leaving_bucket_is_rejected() {
        let liquidity = 10u128.pow(18);
        let huge = U256::exp10(24);
        let result = swap_within_bucket(mid_bucket_price(), liquidity, huge, true, (0, 60));
        assert!(matches!(result, Err(SimulationError::InvalidInput(_))));
    }

    #[test]
    fn test_single_unit_swaps_never_panic() {
        let sqrt_p = mid_bucket_price();
        for zero_for_one in [true, false] {
            let (out, next) =
                swap_within_bucket(sqrt_p, 10u128.pow(24), U256::one(), zero_for_one, (0, 60)).unwrap();
            // One raw unit at a price near 1 buys at most one unit back.
            assert!(out <= U256::one());
            assert!(if zero_for_one { next <= sqrt_p } else { next >= sqrt_p });
        }
        let result = swap_within_bucket(sqrt_p, 10u128.pow(24), U256::zero(), true, (0, 60));
        assert!(matches!(result, Err(SimulationError::InvalidInput(_))));
    }

    #[test]
    fn test_zero_liquidity_rejected() {
        let result = swap_within_bucket(q96(), 0, U256::one(), true, (-60, 60));
        assert!(matches!(result, Err(SimulationError::InvalidInput(_))));
    }
}
