//! Kernel collaborator boundary.
//!
//! Launching kernels and speaking their wire protocol happen elsewhere; this
//! crate only needs to list specs, start one, send it code and interrupt it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use kernel_events::KernelResultEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// An installed kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub name: String,
    pub display_name: String,
    pub language: String,
}

impl KernelSpec {
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            language: language.into(),
        }
    }
}

/// A running kernel's execution channel.
pub trait KernelTransport: Send + Sync {
    /// Submit `code`, resolving once the kernel has accepted it. Result events
    /// keep arriving on `sink` in transport order and end with one terminal
    /// status.
    fn execute(
        &self,
        code: &str,
        sink: mpsc::UnboundedSender<KernelResultEvent>,
    ) -> BoxFuture<'static, Result<()>>;

    fn interrupt(&self) -> BoxFuture<'static, Result<()>>;
}

/// Lists and starts kernels.
pub trait KernelProvider: Send + Sync {
    fn kernel_specs(&self) -> Vec<KernelSpec>;

    /// Start `spec` with `working_dir` as its working directory.
    fn start(
        &self,
        spec: &KernelSpec,
        working_dir: Option<PathBuf>,
    ) -> BoxFuture<'static, Result<Arc<dyn KernelTransport>>>;
}

/// A started kernel bound to a document.
#[derive(Clone)]
pub struct Kernel {
    pub spec: KernelSpec,
    pub transport: Arc<dyn KernelTransport>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel").field("spec", &self.spec).finish()
    }
}
