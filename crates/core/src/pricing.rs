use rust_decimal::{Decimal, RoundingStrategy};

use crate::domain::quotation::{LineItem, MachineInstallation};

/// Round a monetary amount to two decimal places, half-up. Applied only
/// where an amount becomes a stored or displayed total, never on
/// intermediate sums.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Line total for a single priced entry: `quantity * unit_price`, rounded
/// at the point of storage.
pub fn line_total(quantity: u32, unit_price: Decimal) -> Decimal {
    round_money(Decimal::from(quantity) * unit_price)
}

/// Document grand total: the sum of all stored line totals plus the
/// installation charge when present. Tax is *not* folded in; the stored
/// `total_amount` is pre-tax and `tax_rate_percent` is applied at render
/// time only.
pub fn grand_total(line_items: &[LineItem], installation: Option<&MachineInstallation>) -> Decimal {
    let lines: Decimal = line_items.iter().map(|line| line.line_total).sum();
    round_money(lines + installation.map(|block| block.total).unwrap_or(Decimal::ZERO))
}

/// Display-only tax amount for the rendered document.
pub fn tax_amount(total: Decimal, tax_rate_percent: Decimal) -> Decimal {
    round_money(total * tax_rate_percent / Decimal::from(100))
}
