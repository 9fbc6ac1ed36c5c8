//! Per-token pricing used to estimate the cost of a triage run.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) USD cost per token for a model name.
///
/// Matches on model family prefixes; unknown models are priced at zero.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    let m = model.to_ascii_lowercase();
    if m.contains("opus") {
        (dec!(0.000015), dec!(0.000075))
    } else if m.contains("sonnet") {
        (dec!(0.000003), dec!(0.000015))
    } else if m.contains("haiku") {
        (dec!(0.0000008), dec!(0.000004))
    } else if m.starts_with("gpt-4o-mini") {
        (dec!(0.00000015), dec!(0.0000006))
    } else if m.starts_with("gpt-4o") {
        (dec!(0.0000025), dec!(0.00001))
    } else if m.starts_with("gpt-4.1") {
        (dec!(0.000002), dec!(0.000008))
    } else {
        (Decimal::ZERO, Decimal::ZERO)
    }
}

/// Cost of a call given token counts and a (input, output) price pair.
pub fn cost_for(prices: (Decimal, Decimal), input_tokens: u64, output_tokens: u64) -> Decimal {
    prices.0 * Decimal::from(input_tokens) + prices.1 * Decimal::from(output_tokens)
}
