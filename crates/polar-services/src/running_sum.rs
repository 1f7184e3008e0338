//! Clamped running sums
//!
//! Credits can be negative (adjustments). A running total over credit
//! events must never dip below zero at any point: an adjustment arriving
//! while nothing is credited removes nothing from later credits.

use rust_decimal::Decimal;

/// Sum `values` in order, flooring the running total at zero after each step
pub fn clamped_running_sum<I>(values: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .fold(Decimal::ZERO, |total, value| (total + value).max(Decimal::ZERO))
}

/// Every prefix of the clamped running sum
pub fn clamped_prefix_sums<I>(values: I) -> Vec<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .scan(Decimal::ZERO, |total, value| {
            *total = (*total + value).max(Decimal::ZERO);
            Some(*total)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_negative_step_floors_at_zero() {
        let values = [dec!(10), dec!(-15), dec!(3)];

        assert_eq!(clamped_prefix_sums(values), vec![dec!(10), dec!(0), dec!(3)]);
        assert_eq!(clamped_running_sum(values), dec!(3));
    }

    #[test]
    fn test_empty_sum_is_zero() {
        assert_eq!(clamped_running_sum(Vec::new()), Decimal::ZERO);
        assert!(clamped_prefix_sums(Vec::new()).is_empty());
    }

    #[test]
    fn test_order_matters() {
        assert_eq!(clamped_running_sum([dec!(-5), dec!(5)]), dec!(5));
        assert_eq!(clamped_running_sum([dec!(5), dec!(-5)]), dec!(0));
    }

    fn decimals() -> impl Strategy<Value = Vec<Decimal>> {
        prop::collection::vec((-10_000i64..10_000i64).prop_map(|v| Decimal::new(v, 2)), 0..40)
    }

    proptest! {
        #[test]
        fn prop_every_prefix_is_non_negative(values in decimals()) {
            prop_assert!(clamped_prefix_sums(values).iter().all(|v| *v >= Decimal::ZERO));
        }

        #[test]
        fn prop_never_below_plain_sum(values in decimals()) {
            let plain: Decimal = values.iter().copied().sum();
            prop_assert!(clamped_running_sum(values) >= plain);
        }

        #[test]
        fn prop_last_prefix_is_total(values in decimals()) {
            let prefixes = clamped_prefix_sums(values.clone());
            let expected = prefixes.last().copied().unwrap_or(Decimal::ZERO);
            prop_assert_eq!(clamped_running_sum(values), expected);
        }

        #[test]
        fn prop_non_negative_values_sum_plainly(values in prop::collection::vec(0i64..10_000, 0..40)) {
            let values: Vec<Decimal> = values.into_iter().map(Decimal::from).collect();
            let plain: Decimal = values.iter().copied().sum();
            prop_assert_eq!(clamped_running_sum(values), plain);
        }
    }
}
