//! Chooses which remote service instance to talk to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::metrics;

use super::config::InstanceConfig;
use super::geo::{haversine_km, Coordinates, LocationProvider};
use super::store::{load_json, save_json, StateStore, INSTANCE_KEY, LOCATION_KEY};

/// The public default instance URL; a configured URL equal to it is not "custom".
pub const PUBLIC_INSTANCE_URL: &str = "https://vertd.vert.sh";

/// How the instance is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceMode {
    /// Nearest reachable known endpoint, then the others, then the custom URL.
    #[default]
    Auto,
    Eu,
    Us,
    Custom,
}

/// A known instance location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceEndpoint {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub base_url: String,
}

impl InstanceEndpoint {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// The built-in EU and US endpoints, in that order.
pub fn default_endpoints() -> Vec<InstanceEndpoint> {
    vec![
        InstanceEndpoint {
            name: "eu".to_string(),
            latitude: 49.0976,
            longitude: 12.4869,
            base_url: "https://eu.vertd.vert.sh".to_string(),
        },
        InstanceEndpoint {
            name: "us".to_string(),
            latitude: 47.6587,
            longitude: -117.426,
            base_url: "https://usa.vertd.vert.sh".to_string(),
        },
    ]
}

/// Checks whether an instance answers.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn reachable(&self, base_url: &str) -> bool;
}

/// Probes `GET {base}/api/version` and expects a success status.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn reachable(&self, base_url: &str) -> bool {
        let reachable = match self.client.get(format!("{}/api/version", base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(instance = %base_url, "Instance unreachable: {}", e);
                false
            }
        };
        let result = if reachable { "reachable" } else { "unreachable" };
        metrics::INSTANCE_PROBES.with_label_values(&[result]).inc();
        reachable
    }
}

/// Resolves the base URL of the remote service.
pub struct InstanceSelector {
    endpoints: Vec<InstanceEndpoint>,
    mode: Mutex<InstanceMode>,
    custom_url: Mutex<String>,
    location: Arc<dyn LocationProvider>,
    probe: Arc<dyn ReachabilityProbe>,
    cached_location: Mutex<Option<Coordinates>>,
    store: Option<Arc<dyn StateStore>>,
}

impl InstanceSelector {
    pub fn new(
        endpoints: Vec<InstanceEndpoint>,
        custom_url: impl Into<String>,
        location: Arc<dyn LocationProvider>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        Self {
            endpoints,
            mode: Mutex::new(InstanceMode::Auto),
            custom_url: Mutex::new(custom_url.into()),
            location,
            probe,
            cached_location: Mutex::new(None),
            store: None,
        }
    }

    /// Selector over the configured endpoints and custom URL.
    pub fn from_config(
        config: &InstanceConfig,
        location: Arc<dyn LocationProvider>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        Self::new(
            config.endpoints.clone(),
            config.custom_url.clone(),
            location,
            probe,
        )
    }

    /// Starts in `mode` instead of `Auto`.
    pub fn with_mode(self, mode: InstanceMode) -> Self {
        if let Ok(mut current) = self.mode.lock() {
            *current = mode;
        }
        self
    }

    /// Restores mode and cached location from `store` and persists changes to it.
    ///
    /// With nothing saved, a custom URL other than the public one selects `Custom`.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        match load_json::<InstanceMode>(store.as_ref(), INSTANCE_KEY) {
            Ok(Some(mode)) => self.set_mode_inner(mode),
            Ok(None) => {
                let custom = self.custom_url();
                if !custom.is_empty() && custom != PUBLIC_INSTANCE_URL {
                    self.set_mode_inner(InstanceMode::Custom);
                }
            }
            Err(e) => warn!("Failed to load instance settings: {}", e),
        }
        match load_json::<Coordinates>(store.as_ref(), LOCATION_KEY) {
            Ok(Some(coords)) => {
                if let Ok(mut cached) = self.cached_location.lock() {
                    *cached = Some(coords);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to load cached location: {}", e),
        }
        self.store = Some(store);
        self
    }

    fn set_mode_inner(&self, mode: InstanceMode) {
        if let Ok(mut current) = self.mode.lock() {
            *current = mode;
        }
    }

    pub fn mode(&self) -> InstanceMode {
        self.mode.lock().map(|m| *m).unwrap_or_default()
    }

    /// Changes the mode and persists it.
    pub fn set_mode(&self, mode: InstanceMode) {
        self.set_mode_inner(mode);
        info!("Remote instance mode set to {:?}", mode);
        if let Some(store) = &self.store {
            if let Err(e) = save_json(store.as_ref(), INSTANCE_KEY, &mode) {
                warn!("Failed to save instance settings: {}", e);
            }
        }
    }

    pub fn custom_url(&self) -> String {
        self.custom_url
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    pub fn set_custom_url(&self, url: impl Into<String>) {
        if let Ok(mut current) = self.custom_url.lock() {
            *current = url.into();
        }
    }

    /// Uses an explicit device position instead of the IP-derived one.
    pub fn set_device_location(&self, coords: Coordinates) {
        if let Ok(mut cached) = self.cached_location.lock() {
            *cached = Some(coords);
        }
        self.persist_location(coords);
    }

    fn persist_location(&self, coords: Coordinates) {
        if let Some(store) = &self.store {
            if let Err(e) = save_json(store.as_ref(), LOCATION_KEY, &coords) {
                warn!("Failed to save cached location: {}", e);
            }
        }
    }

    pub fn endpoints(&self) -> &[InstanceEndpoint] {
        &self.endpoints
    }

    fn endpoint_url(&self, name: &str) -> String {
        self.endpoints
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.base_url.clone())
            .unwrap_or_else(|| self.custom_url())
    }

    /// Client location, looked up once and then cached.
    async fn location(&self) -> Coordinates {
        if let Some(coords) = self.cached_location.lock().ok().and_then(|c| *c) {
            return coords;
        }

        let coords = self.location.locate().await;
        if let Ok(mut cached) = self.cached_location.lock() {
            *cached = Some(coords);
        }
        self.persist_location(coords);
        coords
    }

    /// Endpoint closest to `here`; ties keep the earlier endpoint.
    pub fn nearest(&self, here: Coordinates) -> Option<&InstanceEndpoint> {
        let mut best: Option<(&InstanceEndpoint, f64)> = None;
        for endpoint in &self.endpoints {
            let distance = haversine_km(here, endpoint.coordinates());
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((endpoint, distance)),
            }
        }
        best.map(|(endpoint, _)| endpoint)
    }

    /// Base URL for the current mode.
    pub async fn url(&self) -> String {
        match self.mode() {
            InstanceMode::Eu => self.endpoint_url("eu"),
            InstanceMode::Us => self.endpoint_url("us"),
            InstanceMode::Custom => self.custom_url(),
            InstanceMode::Auto => {
                let here = self.location().await;
                let primary = self.nearest(here).map(|e| e.base_url.clone());

                if let Some(primary) = &primary {
                    if self.probe.reachable(primary).await {
                        return primary.clone();
                    }
                }
                for endpoint in &self.endpoints {
                    if Some(&endpoint.base_url) == primary.as_ref() {
                        continue;
                    }
                    if self.probe.reachable(&endpoint.base_url).await {
                        return endpoint.base_url.clone();
                    }
                }

                warn!("No known instance reachable, using custom URL");
                self.custom_url()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::geo::FixedLocation;
    use crate::instance::store::MemoryStateStore;
    use crate::testing::MockProbe;

    const CUSTOM: &str = "https://vertd.example.org";

    fn selector(here: Coordinates, probe: MockProbe) -> InstanceSelector {
        InstanceSelector::new(
            default_endpoints(),
            CUSTOM,
            Arc::new(FixedLocation(here)),
            Arc::new(probe),
        )
    }

    fn near_eu() -> Coordinates {
        // about 100 km from the EU endpoint
        Coordinates::new(49.9, 12.1)
    }

    #[tokio::test]
    async fn test_auto_picks_nearest_reachable() {
        let probe = MockProbe::all_reachable();
        let selector = selector(near_eu(), probe.clone());
        assert_eq!(selector.url().await, "https://eu.vertd.vert.sh");
        assert_eq!(probe.probed(), vec!["https://eu.vertd.vert.sh".to_string()]);
    }

    #[tokio::test]
    async fn test_auto_falls_back_to_other_endpoint() {
        let probe = MockProbe::reachable(&["https://usa.vertd.vert.sh"]);
        let selector = selector(near_eu(), probe.clone());
        assert_eq!(selector.url().await, "https://usa.vertd.vert.sh");
        assert_eq!(
            probe.probed(),
            vec![
                "https://eu.vertd.vert.sh".to_string(),
                "https://usa.vertd.vert.sh".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_auto_falls_back_to_custom() {
        let selector = selector(near_eu(), MockProbe::reachable(&[]));
        assert_eq!(selector.url().await, CUSTOM);
    }

    #[tokio::test]
    async fn test_fixed_modes_skip_probing() {
        let probe = MockProbe::reachable(&[]);
        let selector = selector(near_eu(), probe.clone());

        selector.set_mode(InstanceMode::Us);
        assert_eq!(selector.url().await, "https://usa.vertd.vert.sh");
        selector.set_mode(InstanceMode::Eu);
        assert_eq!(selector.url().await, "https://eu.vertd.vert.sh");
        selector.set_mode(InstanceMode::Custom);
        assert_eq!(selector.url().await, CUSTOM);
        assert!(probe.probed().is_empty());
    }

    #[tokio::test]
    async fn test_device_location_overrides_lookup() {
        let probe = MockProbe::all_reachable();
        let selector = selector(near_eu(), probe);
        // Spokane
        selector.set_device_location(Coordinates::new(47.6, -117.4));
        assert_eq!(selector.url().await, "https://usa.vertd.vert.sh");
    }

    #[test]
    fn test_nearest_ties_keep_first() {
        let selector = InstanceSelector::new(
            vec![
                InstanceEndpoint {
                    name: "a".to_string(),
                    latitude: 0.0,
                    longitude: 10.0,
                    base_url: "https://a".to_string(),
                },
                InstanceEndpoint {
                    name: "b".to_string(),
                    latitude: 0.0,
                    longitude: -10.0,
                    base_url: "https://b".to_string(),
                },
            ],
            CUSTOM,
            Arc::new(FixedLocation(Coordinates::default())),
            Arc::new(MockProbe::all_reachable()),
        );
        assert_eq!(selector.nearest(Coordinates::default()).unwrap().name, "a");
    }

    #[test]
    fn test_mode_persists() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let first = selector(near_eu(), MockProbe::all_reachable()).with_store(Arc::clone(&store));
        assert_eq!(first.mode(), InstanceMode::Custom);
        first.set_mode(InstanceMode::Us);

        let second = selector(near_eu(), MockProbe::all_reachable()).with_store(store);
        assert_eq!(second.mode(), InstanceMode::Us);
    }

    #[test]
    fn test_public_url_does_not_force_custom() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let selector = InstanceSelector::new(
            default_endpoints(),
            PUBLIC_INSTANCE_URL,
            Arc::new(FixedLocation(near_eu())),
            Arc::new(MockProbe::all_reachable()),
        )
        .with_store(store);
        assert_eq!(selector.mode(), InstanceMode::Auto);
    }

    #[test]
    fn test_mode_serialization() {
        let json = serde_json::to_string(&InstanceMode::Eu).unwrap();
        assert_eq!(json, r#""eu""#);
        let mode: InstanceMode = serde_json::from_str(r#""custom""#).unwrap();
        assert_eq!(mode, InstanceMode::Custom);
    }
}
