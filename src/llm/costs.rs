//! Per-model token pricing for spend logging.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) USD per token for a model.
///
/// Matched by substring so dated model ids ("claude-sonnet-4-20250514")
/// resolve without table churn. Unknown models price at zero — spend
/// logging must never block a reply.
pub(crate) fn cost_for_model(model: &str) -> (Decimal, Decimal) {
    let lower = model.to_lowercase();

    if lower.contains("opus") {
        (dec!(0.000015), dec!(0.000075))
    } else if lower.contains("sonnet") {
        (dec!(0.000003), dec!(0.000015))
    } else if lower.contains("haiku") {
        (dec!(0.0000008), dec!(0.000004))
    } else if lower.contains("gpt-4o-mini") {
        (dec!(0.00000015), dec!(0.0000006))
    } else if lower.contains("gpt-4o") {
        (dec!(0.0000025), dec!(0.00001))
    } else {
        (Decimal::ZERO, Decimal::ZERO)
    }
}

/// Estimated USD cost of one completion.
pub(crate) fn estimate_cost(
    cost_per_token: (Decimal, Decimal),
    input_tokens: u64,
    output_tokens: u64,
) -> Decimal {
    let (input_cost, output_cost) = cost_per_token;
    input_cost * Decimal::from(input_tokens) + output_cost * Decimal::from(output_tokens)
}
