use crate::domain::payment::PaymentMethod;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    pub fee: Decimal,
    pub net_amount: Decimal,
}

/// Percentage and fixed component charged by the provider behind each method.
fn schedule(method: PaymentMethod) -> (Decimal, Decimal) {
    match method {
        PaymentMethod::Card => (Decimal::new(29, 3), Decimal::new(30, 2)),
        PaymentMethod::Wallet => (Decimal::new(349, 4), Decimal::new(49, 2)),
        PaymentMethod::Other => (Decimal::ZERO, Decimal::ZERO),
    }
}

pub fn compute_fees(method: PaymentMethod, gross: Decimal) -> FeeBreakdown {
    let (rate, fixed) = schedule(method);
    let fee = if rate.is_zero() && fixed.is_zero() {
        Decimal::ZERO
    } else {
        round_money(gross * rate + fixed)
    };

    FeeBreakdown {
        fee,
        net_amount: round_money(gross - fee),
    }
}

/// Two decimal places, half rounds up (amounts are never negative here).
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
