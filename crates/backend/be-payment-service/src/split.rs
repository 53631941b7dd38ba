use rust_decimal::{Decimal, RoundingStrategy};

/// Platform cut of every settled payment, in percent.
pub const PLATFORM_PERCENT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    pub platform_share: Decimal,
    pub instructor_share: Decimal,
    pub gateway_fee_estimate: Decimal,
}

/// Splits `amount` after deducting `gateway_fee`.
///
/// The platform share is rounded half away from zero to a whole unit; the
/// instructor gets the remainder. Neither share goes below zero.
pub fn compute_split(amount: Decimal, gateway_fee: Decimal) -> Split {
    let net = (amount - gateway_fee).max(Decimal::ZERO);
    let platform_share = (net * Decimal::from(PLATFORM_PERCENT) / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let instructor_share = (net - platform_share).max(Decimal::ZERO);

    Split {
        platform_share,
        instructor_share,
        gateway_fee_estimate: gateway_fee,
    }
}
