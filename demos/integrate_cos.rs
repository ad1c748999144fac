//! Integrates cos(x) over [0, pi] by rasterizing one sample per texel of a
//! 16384 x 1 target and summing the samples on the host.
//!
//! The reported value is not checked against the expected one; the process
//! exits zero whenever the run completes.

use std::f32::consts::PI;
use std::process::ExitCode;

use gpu_kernel_pipeline::{kernels, DomainBounds, GpuContext, Integrand, Pipeline, WgpuBackend};

const WIDTH: u32 = 16384;

fn main() -> ExitCode {
    env_logger::init();
    let context = match GpuContext::new_blocking() {
        Ok(context) => context,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let integrand = Integrand::cosine();
    let domain = DomainBounds::new(0.0, PI);
    let mut pipeline = Pipeline::new(WgpuBackend::new(&context));
    match kernels::integrate(&mut pipeline, &integrand, domain, WIDTH) {
        Ok(integral) => {
            println!("Integration result (midpoint Riemann sum)");
            println!("f(x) = {}", integrand.name);
            println!(
                "calculated integral [{}, {}] = {:.6}",
                domain.lower, domain.upper, integral.value
            );
            if let Some(expected) = integrand.expected {
                println!("expected integral value      = {expected:.4}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
