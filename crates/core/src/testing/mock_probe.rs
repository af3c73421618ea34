//! Mock reachability probe for instance selection tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::instance::ReachabilityProbe;

/// Probe with a fixed answer per URL.
///
/// Records every probed URL in order. Clones share the record.
#[derive(Debug, Clone)]
pub struct MockProbe {
    /// `None` means every URL is reachable.
    reachable: Option<HashSet<String>>,
    probed: Arc<Mutex<Vec<String>>>,
}

impl MockProbe {
    pub fn all_reachable() -> Self {
        Self {
            reachable: None,
            probed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Only the listed base URLs answer.
    pub fn reachable(urls: &[&str]) -> Self {
        Self {
            reachable: Some(urls.iter().map(|u| u.to_string()).collect()),
            probed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// URLs probed so far, in order.
    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReachabilityProbe for MockProbe {
    async fn reachable(&self, base_url: &str) -> bool {
        if let Ok(mut probed) = self.probed.lock() {
            probed.push(base_url.to_string());
        }
        match &self.reachable {
            Some(urls) => urls.contains(base_url),
            None => true,
        }
    }
}
