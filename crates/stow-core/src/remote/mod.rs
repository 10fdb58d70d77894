//! Remote service boundary: typed gateway and reachability probe.

mod http;
mod probe;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{OwnerId, Payload, RemoteId};

pub use http::HttpGateway;
pub use probe::{AlwaysReachable, ConnectivityProbe, HttpConnectivityProbe};

/// Header carrying the owner on every resource call
pub const OWNER_HEADER: &str = "x-stow-owner";

/// `code` in a 404 error body when the addressed record does not exist.
/// Any other 404 means the request never reached a record route.
pub const RECORD_NOT_FOUND_CODE: &str = "record_not_found";

/// Outcome of a failed gateway call. The coordinator treats both alike.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// No response (transport failure or timeout)
    #[error("Remote unreachable: {0}")]
    Unreachable(String),
    /// The service answered with a non-success status
    #[error("Remote rejected request: {message} ({status})")]
    Rejected { status: u16, message: String },
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Request body for create and update calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEnvelope<T> {
    pub owner: OwnerId,
    pub payload: T,
}

/// A record as the remote service returns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord<T> {
    pub remote_id: RemoteId,
    pub payload: T,
}

/// Typed client for one domain type on the remote service.
///
/// Calls either fully succeed or fail; there is no partial success.
#[async_trait]
pub trait RemoteGateway<T: Payload>: Send + Sync {
    /// Create the record remotely and return the identifier the service assigned
    async fn create(&self, owner: &OwnerId, payload: &T) -> GatewayResult<RemoteId>;

    /// Replace the remote copy's payload
    async fn update(&self, owner: &OwnerId, remote_id: &RemoteId, payload: &T)
        -> GatewayResult<()>;

    /// Delete the remote copy. Deleting an unknown id succeeds.
    async fn delete(&self, owner: &OwnerId, remote_id: &RemoteId) -> GatewayResult<()>;

    /// Every remote record of this type for the owner
    async fn list(&self, owner: &OwnerId) -> GatewayResult<Vec<RemoteRecord<T>>>;
}
