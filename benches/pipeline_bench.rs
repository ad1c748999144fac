//! Criterion benchmarks for complete pipeline runs.
//!
//! To run the benchmarks use `cargo bench`.  Every iteration is a full run:
//! program build, resource allocation, dispatch, barrier, readback and
//! teardown.  That makes the numbers representative of one-shot offload
//! latency rather than of the kernel alone.

use std::f32::consts::PI;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::Rng;

use gpu_kernel_pipeline::device::SAMPLE_FORMAT;
use gpu_kernel_pipeline::{kernels, DomainBounds, GpuContext, Integrand, Pipeline, WgpuBackend};

fn pipeline_benchmark(c: &mut Criterion) {
    // Establish a single GPU context up front so that adapter and device
    // creation are not part of the measurement.
    let context = match GpuContext::new_blocking() {
        Ok(context) => context,
        Err(e) => {
            eprintln!("skipping GPU benchmarks: {e}");
            return;
        }
    };
    let mut pipeline = Pipeline::new(WgpuBackend::new(&context));
    let mut rng = rand::thread_rng();

    c.bench_function("gpu scalar add", |bencher| {
        bencher.iter(|| {
            let a: f32 = rng.gen();
            let b: f32 = rng.gen();
            kernels::add_scalars(&mut pipeline, a, b)
        });
    });

    let domain = DomainBounds::new(0.0, PI);
    let integrand = Integrand::cosine();
    let width = 16384.min(context.device.limits().max_texture_dimension_2d);
    if context.renders_to(SAMPLE_FORMAT) {
        c.bench_function("gpu integrate cos", |bencher| {
            bencher.iter(|| kernels::integrate(&mut pipeline, &integrand, domain, width));
        });
    } else {
        eprintln!("skipping GPU integration: adapter cannot render into {SAMPLE_FORMAT:?}");
    }
    c.bench_function("cpu integrate cos", |bencher| {
        bencher.iter(|| kernels::reference_integral(f32::cos, domain, width));
    });
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
