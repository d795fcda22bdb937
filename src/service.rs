//! Defines the operation surface shared by all layers.
//!
//! Both the [SingleFlightCache](crate::cache::SingleFlightCache) and the
//! [ThrottlingService](crate::throttle::ThrottlingService) implement [ApiService]. This permits
//! to stack them (the throttle holds the cache as its inner service) while every layer still
//! exposes the very same operations.
use async_trait::async_trait;

use crate::request::{AddOrUpdateRequest, GetRequest};
use crate::response::{AddOrUpdateResponse, GetResponse};

/// Provides read and write access to a keyed resource.
///
/// Implementations never fail with an error - all outcomes are reported as responses.
#[async_trait]
pub trait ApiService<V>: Send + Sync {
    /// Reads the resource named in the request.
    async fn get_resource(&self, request: GetRequest) -> GetResponse<V>;

    /// Adds or updates the resource named in the request.
    async fn add_or_update_resource(&self, request: AddOrUpdateRequest<V>) -> AddOrUpdateResponse;
}
