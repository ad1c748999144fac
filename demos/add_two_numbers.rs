//! Adds two scalars inside a single-invocation compute kernel.
//!
//! Exits non-zero when no GPU context can be acquired or the run fails.
//! Set `RUST_LOG=debug` to follow each pipeline stage.

use std::process::ExitCode;

use gpu_kernel_pipeline::{kernels, GpuContext, Pipeline, WgpuBackend};

const A: f32 = 55.0;
const B: f32 = 45.9;

fn main() -> ExitCode {
    env_logger::init();
    let context = match GpuContext::new_blocking() {
        Ok(context) => context,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let mut pipeline = Pipeline::new(WgpuBackend::new(&context));
    match kernels::add_scalars(&mut pipeline, A, B) {
        Ok(sum) => {
            println!("1st number      = {A}");
            println!("2nd number      = {B}");
            println!("addition result = {sum}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
