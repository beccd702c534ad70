//! Client for the ArcGIS World Geocoding Service.
//!
//! Supports forward geocoding, reverse geocoding, suggestions and batch
//! geocoding. Operations that require authentication go through an OAuth
//! client credentials exchange with an in-memory token cache.

pub mod auth;
pub mod geocoder;
mod utils;

pub use geocoder::Geocoder;
pub use utils::{ServerError, ServiceFault};
