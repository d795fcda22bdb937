//! Contains the requests accepted by an [ApiService](crate::service::ApiService).
//!
//! A request names the **client** (by its network address) which is used by the
//! [throttle](crate::throttle) and the **resource** which is used by the
//! [cache](crate::cache). The email is carried along for the embedding application and plays
//! no role in throttling or caching.

/// Requests the current value of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    /// The address of the calling client.
    pub client_address: String,

    /// The email of the requesting user.
    pub email: String,

    /// The id of the requested resource.
    pub resource_id: String,
}

impl GetRequest {
    /// Creates a new request.
    pub fn new(
        client_address: impl Into<String>,
        email: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        GetRequest {
            client_address: client_address.into(),
            email: email.into(),
            resource_id: resource_id.into(),
        }
    }
}

/// Requests to store a new value for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOrUpdateRequest<V> {
    /// The address of the calling client.
    pub client_address: String,

    /// The email of the requesting user.
    pub email: String,

    /// The id of the resource to update.
    pub resource_id: String,

    /// The new value of the resource.
    pub value: V,
}

impl<V> AddOrUpdateRequest<V> {
    /// Creates a new request.
    pub fn new(
        client_address: impl Into<String>,
        email: impl Into<String>,
        resource_id: impl Into<String>,
        value: V,
    ) -> Self {
        AddOrUpdateRequest {
            client_address: client_address.into(),
            email: email.into(),
            resource_id: resource_id.into(),
            value,
        }
    }
}
