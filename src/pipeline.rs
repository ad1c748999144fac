//! One complete kernel run: build, provision, dispatch, read back, tear down.

use std::collections::BTreeMap;

use log::{info, warn};

use crate::backend::Backend;
use crate::descriptor::KernelDescriptor;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::program::{Program, ProgramBuilder};
use crate::readback::{readback, HostBuffer, ReadTarget};
use crate::resource::{InitialData, ResourceManager, ResourceSet};

/// Host copies of the resources requested from a run, valid only because
/// the run finished its dispatch barrier.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionResult {
    buffers: BTreeMap<u32, HostBuffer>,
    samples: Option<HostBuffer>,
}

impl ExecutionResult {
    pub fn buffer(&self, index: u32) -> Option<&HostBuffer> {
        self.buffers.get(&index)
    }

    pub fn samples(&self) -> Option<&HostBuffer> {
        self.samples.as_ref()
    }
}

/// Drives kernel runs on one backend.
///
/// The backend, and with it the GPU context, is injected by the caller;
/// two pipelines never share device state.
pub struct Pipeline<B: Backend> {
    backend: B,
}

impl<B: Backend> Pipeline<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Runs `descriptor` once and copies `targets` back to the host.
    ///
    /// Every device resource created for the run, including the program,
    /// is released before this returns, whether the run succeeded or not.
    pub fn run(
        &mut self,
        descriptor: &KernelDescriptor,
        initial: &InitialData,
        targets: &[ReadTarget],
    ) -> Result<ExecutionResult> {
        let program = ProgramBuilder::build(&mut self.backend, descriptor)?;
        let outcome = match ResourceManager::provision(&mut self.backend, descriptor, initial) {
            Ok(mut resources) => {
                let outcome = self.execute(&program, &resources, descriptor, targets);
                if outcome.is_err() {
                    warn!("`{}`: run failed, releasing its resources", descriptor.label);
                }
                resources.teardown(&mut self.backend);
                outcome
            }
            Err(e) => Err(e),
        };
        ProgramBuilder::release(&mut self.backend, program);

        if outcome.is_ok() {
            info!("`{}`: run complete", descriptor.label);
        }
        outcome
    }

    fn execute(
        &mut self,
        program: &Program<B>,
        resources: &ResourceSet<B>,
        descriptor: &KernelDescriptor,
        targets: &[ReadTarget],
    ) -> Result<ExecutionResult> {
        let handle = Dispatcher::execute(&mut self.backend, program, resources, descriptor)?;
        let mut result = ExecutionResult::default();
        for &target in targets {
            let host = readback(&mut self.backend, resources, &handle, target)?;
            match target {
                ReadTarget::Binding(index) => {
                    result.buffers.insert(index, host);
                }
                ReadTarget::Samples => result.samples = Some(host),
            }
        }
        Ok(result)
    }
}
