//! Median price computation
//!
//! Median rather than mean: insensitive to a minority of arbitrarily large
//! outlier submissions.

use rust_decimal::Decimal;

/// Median of the given prices. Odd count takes the middle value; even count
/// takes the arithmetic mean of the two middle values. `None` on empty input.
pub fn median_price(prices: &[Decimal]) -> Option<Decimal> {
    if prices.is_empty() {
        return None;
    }

    let mut sorted = prices.to_vec();
    sorted.sort();

    let n = sorted.len();
    let mid = n / 2;
    if n % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / Decimal::TWO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn odd_count_takes_middle() {
        let prices = vec![dec!(100), dec!(101), dec!(99), dec!(102), dec!(98)];
        assert_eq!(median_price(&prices), Some(dec!(100)));
    }

    #[test]
    fn even_count_averages_middle_pair() {
        let prices = vec![dec!(100), dec!(102), dec!(98), dec!(104)];
        assert_eq!(median_price(&prices), Some(dec!(101)));
    }

    #[test]
    fn single_submission_is_its_own_median() {
        assert_eq!(median_price(&[dec!(42.5)]), Some(dec!(42.5)));
    }

    #[test]
    fn empty_has_no_median() {
        assert_eq!(median_price(&[]), None);
    }

    #[test]
    fn invariant_under_reordering() {
        let a = vec![dec!(5), dec!(1), dec!(3), dec!(2), dec!(4)];
        let b = vec![dec!(1), dec!(2), dec!(3), dec!(4), dec!(5)];
        assert_eq!(median_price(&a), median_price(&b));
    }

    #[test]
    fn robust_to_extreme_minority() {
        let prices = vec![dec!(100), dec!(101), dec!(99), dec!(1000000)];
        // Two middle values are 100 and 101.
        assert_eq!(median_price(&prices), Some(dec!(100.5)));
    }
}
