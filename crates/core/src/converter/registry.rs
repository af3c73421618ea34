//! Registry of available backends and conversion routing.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::capabilities::native_first;
use super::error::ConverterError;
use super::traits::Backend;
use super::types::BackendStatus;

/// Ordered set of backends. Registration order breaks routing ties.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self { backends }
    }

    /// Appends a backend after the existing ones.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.push(backend);
    }

    pub fn all(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.iter().find(|b| b.name() == name).cloned()
    }

    /// Backends that list `from` in their catalog, native handlers first.
    pub fn eligible(&self, from: &str) -> Vec<Arc<dyn Backend>> {
        let mut eligible: Vec<Arc<dyn Backend>> = self
            .backends
            .iter()
            .filter(|b| b.supports(from))
            .cloned()
            .collect();
        // stable: registration order is kept among equals
        eligible.sort_by(|a, b| native_first(a.format(from), b.format(from)));
        eligible
    }

    /// First backend for a source format, native handlers first.
    pub fn resolve(&self, from: &str) -> Option<Arc<dyn Backend>> {
        self.eligible(from)
            .into_iter()
            .find(|b| b.format(from).map(|f| f.from_supported()).unwrap_or(false))
    }

    /// Resolves the single backend shared by every archive member format.
    pub fn resolve_archive<'a>(
        &self,
        member_formats: impl IntoIterator<Item = &'a str>,
    ) -> Result<Arc<dyn Backend>, ConverterError> {
        let mut names = BTreeSet::new();
        let mut chosen: Option<Arc<dyn Backend>> = None;
        for format in member_formats {
            match self.resolve(format) {
                Some(backend) => {
                    names.insert(backend.name().to_string());
                    chosen.get_or_insert(backend);
                }
                None => {
                    names.insert(format!("unsupported({})", format));
                }
            }
        }

        match chosen {
            Some(backend) if names.len() == 1 => Ok(backend),
            _ => Err(ConverterError::MixedFormatArchive {
                backends: names.into_iter().collect(),
            }),
        }
    }

    /// Default target for a source format: the first other writable format
    /// in the resolved backend's catalog.
    pub fn default_target(&self, from: &str) -> Option<String> {
        let backend = self.resolve(from)?;
        backend
            .supported_formats()
            .iter()
            .find(|f| f.extension() != from && f.to_supported())
            .map(|f| f.extension().to_string())
    }

    /// Readiness of every backend, in registration order.
    pub fn statuses(&self) -> Vec<(String, BackendStatus)> {
        self.backends
            .iter()
            .map(|b| (b.name().to_string(), b.status()))
            .collect()
    }

    /// Preloads every backend concurrently.
    pub async fn preload_all(&self) {
        futures::future::join_all(self.backends.iter().map(|b| b.preload())).await;
    }
}

/// Picks the backend for a `from -> to` pair among eligible candidates.
///
/// Both formats must be in the candidate's catalog in the right direction,
/// and at least one of them must be native to it.
pub fn select_backend(
    candidates: &[Arc<dyn Backend>],
    from: &str,
    to: &str,
) -> Option<Arc<dyn Backend>> {
    candidates
        .iter()
        .find(|backend| {
            let (Some(src), Some(dst)) = (backend.format(from), backend.format(to)) else {
                return false;
            };
            src.from_supported() && dst.to_supported() && (src.is_native() || dst.is_native())
        })
        .cloned()
}
