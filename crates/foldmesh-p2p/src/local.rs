use std::sync::Weak;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use log::debug;

use crate::error::PeerError;
use crate::message::{decode_request, decode_response, encode_request, encode_response, PeerRequest, PeerResponse};
use crate::transport::{PeerService, PeerTransport};

/// In-process transport connecting every node registered on it.
///
/// Requests and responses are framed with bincode on the way through so only
/// wire-encodable messages ever cross it. Endpoints can be partitioned to
/// simulate unreachable peers.
#[derive(Default)]
pub struct LocalNetwork {
    services: DashMap<String, Weak<dyn PeerService>>,
    partitioned: DashSet<String>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `endpoint` unreachable in both directions.
    pub fn partition(&self, endpoint: &str) {
        self.partitioned.insert(endpoint.to_string());
    }

    pub fn heal(&self, endpoint: &str) {
        self.partitioned.remove(endpoint);
    }

    pub fn is_registered(&self, endpoint: &str) -> bool {
        self.services
            .get(endpoint)
            .map(|svc| svc.strong_count() > 0)
            .unwrap_or(false)
    }

    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        endpoints.sort();
        endpoints
    }
}

#[async_trait]
impl PeerTransport for LocalNetwork {
    async fn register(&self, endpoint: &str, service: Weak<dyn PeerService>) -> Result<(), PeerError> {
        if self.is_registered(endpoint) {
            return Err(PeerError::AddressInUse(endpoint.to_string()));
        }
        self.services.insert(endpoint.to_string(), service);
        debug!("[LocalNetwork] registered {}", endpoint);
        Ok(())
    }

    async fn deregister(&self, endpoint: &str) {
        self.services.remove(endpoint);
        debug!("[LocalNetwork] deregistered {}", endpoint);
    }

    async fn send(&self, endpoint: &str, request: PeerRequest) -> Result<PeerResponse, PeerError> {
        if self.partitioned.contains(endpoint) {
            return Err(PeerError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: "partitioned".to_string(),
            });
        }
        // The guard must not live across the await below.
        let service = self.services.get(endpoint).and_then(|svc| svc.upgrade());
        let service = service.ok_or_else(|| PeerError::Unreachable {
            endpoint: endpoint.to_string(),
            reason: "no service listening".to_string(),
        })?;

        let frame = encode_request(&request)?;
        let response = service.handle(decode_request(&frame)?).await?;
        let frame = encode_response(&response)?;
        decode_response(&frame)
    }
}
