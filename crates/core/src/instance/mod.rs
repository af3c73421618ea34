//! Remote instance selection and abuse protection.
//!
//! [`InstanceSelector`] picks the remote service endpoint, and [`Blocklist`]
//! refuses inputs whose content hash keeps failing remotely. Both persist
//! through a [`StateStore`].

mod blocklist;
mod config;
mod geo;
mod hash;
mod selector;
mod store;

pub use blocklist::{default_strike_window, Blocklist, StrikeStatus, DEFAULT_STRIKE_THRESHOLD};
pub use config::InstanceConfig;
pub use geo::{
    haversine_km, Coordinates, FixedLocation, IpApiLocator, LocationProvider, DEFAULT_LOCATOR_URL,
};
pub use hash::{content_hash, HASH_CHUNK_SIZE};
pub use selector::{
    default_endpoints, HttpProbe, InstanceEndpoint, InstanceMode, InstanceSelector,
    ReachabilityProbe, PUBLIC_INSTANCE_URL,
};
pub use store::{
    load_json, save_json, MemoryStateStore, SqliteStateStore, StateStore, StoreError,
    BLOCKLIST_KEY, INSTANCE_KEY, LOCATION_KEY,
};
