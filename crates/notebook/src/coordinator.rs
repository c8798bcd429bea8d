//! Kernel acquisition, one kernel per document.
//!
//! Concurrent `ensure_kernel` calls for the same document share a single
//! in-flight start. The shared future is dropped from the in-flight map once
//! it resolves, so a failed start can be retried.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chunk_text::Range;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use log::{error, info, warn};

use crate::kernel::{Kernel, KernelProvider, KernelSpec};
use crate::project_file::find_nearest_project_file;
use crate::registry::{lock, DocumentId, DocumentRegistry, SharedDocument};
use crate::render::OutputRenderer;
use crate::settings::Settings;
use crate::NotebookError;

type Acquisition = Shared<BoxFuture<'static, Option<Kernel>>>;

/// What a document's location says about its kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathHint {
    /// A configured kernel hint named this kernel.
    Kernel(String),
    /// The nearest project file implies this language.
    Language(&'static str),
}

/// Derive a kernel hint from `path`: configured hints first, then the nearest
/// project file.
pub fn path_hint(settings: &Settings, path: &Path) -> Option<PathHint> {
    if let Some(kernel) = settings.kernel_hint_for(path) {
        return Some(PathHint::Kernel(kernel.to_string()));
    }
    find_nearest_project_file(path).map(|found| PathHint::Language(found.kind.language()))
}

/// Pick a kernel: the one last used for the document, then the path hint,
/// then the first spec for the document's language.
pub fn select_kernel_spec(
    specs: &[KernelSpec],
    last_used: Option<&str>,
    hint: Option<&PathHint>,
    language: Option<&str>,
) -> Option<KernelSpec> {
    let by_name = |name: &str| specs.iter().find(|s| s.name == name);
    let by_language = |language: &str| {
        specs
            .iter()
            .find(|s| s.language.eq_ignore_ascii_case(language))
    };

    last_used
        .and_then(by_name)
        .or_else(|| match hint? {
            PathHint::Kernel(name) => by_name(name.as_str()),
            PathHint::Language(language) => by_language(*language),
        })
        .or_else(|| language.and_then(by_language))
        .cloned()
}

/// Owns the documents and their kernels.
pub struct ExecutionCoordinator {
    provider: Arc<dyn KernelProvider>,
    registry: DocumentRegistry,
    settings: Settings,
    acquisitions: StdMutex<HashMap<DocumentId, (u64, Acquisition)>>,
    next_acquisition: AtomicU64,
}

impl ExecutionCoordinator {
    pub fn new(
        provider: Arc<dyn KernelProvider>,
        renderer: Arc<dyn OutputRenderer>,
        settings: Settings,
    ) -> Self {
        Self {
            provider,
            registry: DocumentRegistry::new(renderer),
            settings,
            acquisitions: StdMutex::new(HashMap::new()),
            next_acquisition: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn observe(
        &self,
        id: DocumentId,
        text: &str,
        language: Option<&str>,
        path: Option<PathBuf>,
    ) -> SharedDocument {
        self.registry.observe(id, text, language, path)
    }

    pub fn edit(&self, id: &DocumentId, range: Range, text: &str) -> Result<Range, NotebookError> {
        self.registry.edit(id, range, text)
    }

    pub fn close(&self, id: &DocumentId) -> Result<(), NotebookError> {
        lock(&self.acquisitions).remove(id);
        self.registry.close(id)
    }

    /// The document's kernel, starting one if needed. Every concurrent caller
    /// gets the same kernel. `None` when no kernel spec fits or the start
    /// failed.
    pub async fn ensure_kernel(&self, id: &DocumentId) -> Result<Option<Kernel>, NotebookError> {
        let shared = self.registry.get(id)?;
        if let Some(kernel) = lock(&shared).kernel.clone() {
            return Ok(Some(kernel));
        }

        let (generation, acquisition) = {
            let mut acquisitions = lock(&self.acquisitions);
            match acquisitions.get(id) {
                Some((generation, acquisition)) => (*generation, acquisition.clone()),
                None => {
                    let generation = self.next_acquisition.fetch_add(1, Ordering::Relaxed);
                    let acquisition = self.acquire(id, &shared).shared();
                    acquisitions.insert(id.clone(), (generation, acquisition.clone()));
                    (generation, acquisition)
                }
            }
        };

        let kernel = acquisition.await;

        {
            let mut acquisitions = lock(&self.acquisitions);
            if acquisitions
                .get(id)
                .is_some_and(|(current, _)| *current == generation)
            {
                acquisitions.remove(id);
            }
        }

        // The document may have been closed, or closed and observed again,
        // while the kernel started
        let current = self.registry.get(id)?;
        if !Arc::ptr_eq(&current, &shared) {
            return Err(NotebookError::UnknownDocument(id.clone()));
        }

        let mut state = lock(&shared);
        if let Some(existing) = state.kernel.clone() {
            return Ok(Some(existing));
        }
        if let Some(ref kernel) = kernel {
            state.kernel = Some(kernel.clone());
            state.last_kernel_name = Some(kernel.spec.name.clone());
        }
        Ok(kernel)
    }

    /// Build the start future for a document. Runs under the acquisitions
    /// lock so the provider is asked to start at most once per acquisition.
    fn acquire(&self, id: &DocumentId, shared: &SharedDocument) -> BoxFuture<'static, Option<Kernel>> {
        let (language, path, last_used) = {
            let state = lock(shared);
            (
                state.document.language().map(str::to_string),
                state.document.path().map(Path::to_path_buf),
                state.last_kernel_name.clone(),
            )
        };

        let hint = path.as_deref().and_then(|p| path_hint(&self.settings, p));
        let specs = self.provider.kernel_specs();
        let Some(spec) = select_kernel_spec(&specs, last_used.as_deref(), hint.as_ref(), language.as_deref())
        else {
            warn!(
                "[coordinator] No kernel spec for {} (language {:?}, {} specs installed)",
                id,
                language,
                specs.len()
            );
            return future::ready(None).boxed();
        };

        info!("[coordinator] Starting kernel {} for {}", spec.name, id);
        let working_dir = path.as_deref().and_then(Path::parent).map(Path::to_path_buf);
        let start = self.provider.start(&spec, working_dir);
        let id = id.clone();
        async move {
            match start.await {
                Ok(transport) => {
                    info!("[coordinator] Kernel {} ready for {}", spec.name, id);
                    Some(Kernel { spec, transport })
                }
                Err(e) => {
                    error!("[coordinator] Failed to start kernel {} for {}: {}", spec.name, id, e);
                    None
                }
            }
        }
        .boxed()
    }
}
