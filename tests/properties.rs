//! Property-based tests for the addition kernel and the sample-to-domain
//! mapping, using proptest.
//!
//! One fake pipeline is reused across all iterations of a property; the
//! RefCell gives the `Fn` closure of `TestRunner::run` mutable access.

mod common;

use std::cell::RefCell;

use common::FakeBackend;
use gpu_kernel_pipeline::{domain_point, kernels, DomainBounds, Pipeline};
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use rand::Rng;

/// Single-precision tolerance of the addition kernel.
const ADD_TOLERANCE: f32 = 1e-4;

#[test]
fn addition_is_commutative() {
    let pipeline = RefCell::new(Pipeline::new(FakeBackend::new().with_addition()));
    let mut runner = TestRunner::new(Config::with_cases(256));
    runner
        .run(&(-1.0e6f32..1.0e6, -1.0e6f32..1.0e6), |(a, b)| {
            let mut pipeline = pipeline.borrow_mut();
            let ab = kernels::add_scalars(&mut pipeline, a, b).unwrap();
            let ba = kernels::add_scalars(&mut pipeline, b, a).unwrap();
            prop_assert!((ab - ba).abs() <= ADD_TOLERANCE, "{a} + {b}: {ab} vs {ba}");
            Ok(())
        })
        .unwrap();
    assert_eq!(pipeline.borrow().backend().live, 0);
}

#[test]
fn addition_matches_host_sum_for_random_operands() {
    let mut pipeline = Pipeline::new(FakeBackend::new().with_addition());
    let mut rng = rand::thread_rng();
    for _ in 0..100 {
        let a: f32 = rng.gen_range(-1000.0..1000.0);
        let b: f32 = rng.gen_range(-1000.0..1000.0);
        let sum = kernels::add_scalars(&mut pipeline, a, b).unwrap();
        assert!((sum - (a + b)).abs() <= ADD_TOLERANCE, "{a} + {b} = {sum}");
    }
}

proptest! {
    #[test]
    fn first_and_last_samples_are_centred(
        lower in -10.0f32..10.0,
        span in 1.0f32..100.0,
        width in 1u32..=16384,
    ) {
        let upper = lower + span;
        let domain = DomainBounds::new(lower, upper);
        let (l, u, w) = (f64::from(lower), f64::from(upper), f64::from(width));

        let first = f64::from(domain_point(0, width, domain));
        let last = f64::from(domain_point(width - 1, width, domain));
        let tolerance = 1e-5 * (l.abs() + u.abs() + 1.0);
        prop_assert!((first - (l + (u - l) * 0.5 / w)).abs() <= tolerance);
        prop_assert!((last - (l + (u - l) * (w - 0.5) / w)).abs() <= tolerance);

        prop_assert!(first > l && last < u, "samples [{first}, {last}] touch [{l}, {u}]");
    }

    #[test]
    fn samples_increase_with_index(
        lower in -10.0f32..10.0,
        span in 1.0f32..100.0,
        width in 2u32..=4096,
    ) {
        let domain = DomainBounds::new(lower, lower + span);
        let points: Vec<f32> = (0..width).map(|i| domain_point(i, width, domain)).collect();
        prop_assert!(points.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
