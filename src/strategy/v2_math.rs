//! Uniswap V2 constant-product math in on-chain integer arithmetic.
//!
//! Mirrors `UniswapV2Library.getAmountOut`: every division truncates toward
//! zero, so the computed output never exceeds what the pair would pay.

use web3::types::U256;

use crate::types::{FeeRate, SimulationError, BPS};

/// Exact output amount for a swap against `x * y = k` reserves.
///
/// `out = in·(B−fee)·r_out / (r_in·B + in·(B−fee))` with `B = 10_000`.
pub fn get_amount_out(
    amount_in: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee: FeeRate,
) -> Result<U256, SimulationError> {
    if amount_in.is_zero() {
        return Err(SimulationError::InvalidInput(
            "input amount must be positive".into(),
        ));
    }
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err(SimulationError::InvalidInput(
            "reserves must be positive".into(),
        ));
    }
    if !fee.is_valid() {
        return Err(SimulationError::InvalidInput(format!(
            "fee {fee} must be below 100%"
        )));
    }

    let in_with_fee = amount_in
        .checked_mul(U256::from(BPS - fee.bps()))
        .ok_or(SimulationError::Overflow("amount_in * fee multiplier"))?;
    let numerator = in_with_fee
        .checked_mul(reserve_out)
        .ok_or(SimulationError::Overflow("amount_in * reserve_out"))?;
    let denominator = reserve_in
        .checked_mul(U256::from(BPS))
        .and_then(|d| d.checked_add(in_with_fee))
        .ok_or(SimulationError::Overflow("reserve_in + amount_in"))?;

    Ok(numerator / denominator)
}

/// Closed-form input that maximizes `sell(buy(x)) − x` for two chained
/// constant-product pools.
///
/// Composing the legs gives `z(x) = a·x / (b + c·x)` with
/// `a = γa·γb·Ra_out·Rb_out`, `b = B²·Ra_in·Rb_in`,
/// `c = γa·(B·Rb_in + γb·Ra_out)` (fees as `γ = B − fee_bps`), so
/// `x* = (√(a·b) − b) / c`. Returns `None` when no positive input is
/// profitable or intermediate values leave the `U256` range.
pub fn optimal_round_trip_input(
    buy_reserve_in: U256,
    buy_reserve_out: U256,
    buy_fee: FeeRate,
    sell_reserve_in: U256,
    sell_reserve_out: U256,
    sell_fee: FeeRate,
) -> Option<U256> {
    if !buy_fee.is_valid() || !sell_fee.is_valid() {
        return None;
    }
    let bps = U256::from(BPS);
    let gamma_a = U256::from(BPS - buy_fee.bps());
    let gamma_b = U256::from(BPS - sell_fee.bps());

    let a = gamma_a
        .checked_mul(gamma_b)?
        .checked_mul(buy_reserve_out)?
        .checked_mul(sell_reserve_out)?;
    let b = bps
        .checked_mul(bps)?
        .checked_mul(buy_reserve_in)?
        .checked_mul(sell_reserve_in)?;
    if a <= b {
        return None;
    }

    let c = gamma_a.checked_mul(
        bps.checked_mul(sell_reserve_in)?
            .checked_add(gamma_b.checked_mul(buy_reserve_out)?)?,
    )?;
    if c.is_zero() {
        return None;
    }

    // a·b routinely exceeds 256 bits; √a·√b loses only the fractional parts.
    let root = a.integer_sqrt().checked_mul(b.integer_sqrt())?;
    if root <= b {
        return None;
    }
    let optimal = (root - b) / c;
    (!optimal.is_zero()).then_some(optimal)
}
