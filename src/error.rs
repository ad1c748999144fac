//! Error type shared by every stage of the kernel pipeline.
//!
//! A pipeline run is a run-to-completion batch computation: every variant
//! below aborts the run that produced it and no partial result is ever
//! handed back.  The variants follow the order in which a run can fail:
//! acquiring the device, validating and building the kernel, allocating
//! resources, dispatching, and finally reading results back.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// No adapter or device could be obtained from the platform.
    #[error("failed to acquire a GPU context: {0}")]
    ContextAcquisition(String),

    /// The kernel failed to parse, validate, compile or link.  The
    /// diagnostics carry the rendered text from the shader front end or
    /// the device.
    #[error("failed to build kernel `{label}`:\n{diagnostics}")]
    Build { label: String, diagnostics: String },

    /// Host-side resource wiring does not agree with what the kernel
    /// declares, or a stage references a binding that was never
    /// provisioned.
    #[error("binding mismatch in `{label}`: {detail}")]
    BindingMismatch { label: String, detail: String },

    /// The descriptor itself is malformed (zero sizes, duplicate indices,
    /// sources that do not fit the execution mode, ...).
    #[error("invalid kernel descriptor `{label}`: {detail}")]
    InvalidDescriptor { label: String, detail: String },

    /// A buffer, texture or render target could not be created.
    #[error("failed to allocate {what}: {detail}")]
    Allocation { what: String, detail: String },

    /// The device rejected the submitted work or the synchronization wait
    /// failed.
    #[error("kernel dispatch failed: {0}")]
    Dispatch(String),

    /// Results could not be copied back to host memory.
    #[error("readback failed: {0}")]
    Readback(String),
}

impl PipelineError {
    pub(crate) fn binding(label: &str, detail: impl Into<String>) -> Self {
        Self::BindingMismatch {
            label: label.to_owned(),
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid(label: &str, detail: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            label: label.to_owned(),
            detail: detail.into(),
        }
    }

    pub(crate) fn build(label: &str, diagnostics: impl Into<String>) -> Self {
        Self::Build {
            label: label.to_owned(),
            diagnostics: diagnostics.into(),
        }
    }
}
