//! Client location lookup and great-circle distance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Default geolocation endpoint.
pub const DEFAULT_LOCATOR_URL: &str = "https://ipapi.co/json/";

/// A point on the globe in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Source of the client's approximate location.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Best-effort location; implementations fall back rather than fail.
    async fn locate(&self) -> Coordinates;
}

/// A location known up front.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinates);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn locate(&self) -> Coordinates {
        self.0
    }
}

/// IP geolocation over HTTP. Falls back to `(0, 0)` on any failure.
pub struct IpApiLocator {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct IpApiResponse {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl IpApiLocator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }

    async fn fetch(&self) -> Result<Coordinates, reqwest::Error> {
        let response: IpApiResponse = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Coordinates::new(
            response.latitude.unwrap_or(0.0),
            response.longitude.unwrap_or(0.0),
        ))
    }
}

impl Default for IpApiLocator {
    fn default() -> Self {
        Self::new(DEFAULT_LOCATOR_URL, Duration::from_secs(5))
    }
}

#[async_trait]
impl LocationProvider for IpApiLocator {
    async fn locate(&self) -> Coordinates {
        match self.fetch().await {
            Ok(coords) => {
                debug!("Located client at {:?}", coords);
                coords
            }
            Err(e) => {
                warn!("Geolocation failed, assuming (0, 0): {}", e);
                Coordinates::default()
            }
        }
    }
}
