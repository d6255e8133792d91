//! Capacity arithmetic properties

use placement::objects::inventory::{capacity, Inventory};
use proptest::prelude::*;

/// Capacity never exceeds the scaled unreserved total and shrinks as reservations grow.
#[test]
fn test_capacity_is_floor_of_scaled_unreserved_total() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(1i64..100_000, 0.0f64..1.0, 0.1f64..16.0),
            |(total, reserved_share, ratio)| {
                let reserved = (total as f64 * reserved_share) as i64;
                let cap = capacity(total, reserved, ratio);

                let exact = (total - reserved) as f64 * ratio;
                prop_assert!(cap as f64 <= exact);
                prop_assert!(exact - (cap as f64) < 1.0);
                prop_assert!(capacity(total, reserved + 1, ratio) <= cap);
                Ok(())
            },
        )
        .unwrap();
}

#[test]
fn test_inventory_capacity_matches_formula() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(1i64..10_000, 0i64..10_000, prop::sample::select(vec![1.0, 1.5, 4.0, 16.0])), |(total, reserved, ratio)| {
            prop_assume!(reserved <= total);
            let inv = Inventory::new("VCPU", total)
                .with_reserved(reserved)
                .with_allocation_ratio(ratio);
            prop_assert!(inv.validate().is_ok());
            prop_assert_eq!(inv.capacity(), capacity(total, reserved, ratio));
            Ok(())
        })
        .unwrap();
}
