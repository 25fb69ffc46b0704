//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use lanwatch_core::Subnet;
use lanwatch_discovery::RefreshOutcome;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::interfaces;
use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// List all live devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.devices().await)
}

/// Re-probe a single device
pub async fn refresh_device(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    let addr: Ipv4Addr = match ip.parse() {
        Ok(addr) => addr,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(RefreshOutcome {
                    success: false,
                    message: format!("Error: invalid address {}: {}", ip, e),
                }),
            )
                .into_response()
        }
    };

    info!(ip = %addr, "Device refresh requested");
    Json(state.scanner.refresh_device(addr).await).into_response()
}

/// Trigger a discovery scan
pub async fn trigger_scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Manual scan triggered");

    let summary = state.scanner.scan_once().await;
    Json(serde_json::json!({
        "status": "completed",
        "devices_found": summary.found,
        "total": summary.total,
        "online": summary.online,
        "cycle": summary.cycle,
    }))
}

/// Startup configuration plus the subnet currently scanned
#[derive(Serialize)]
pub struct ConfigResponse {
    #[serde(flatten)]
    pub config: Config,
    pub active_subnet: Subnet,
}

/// Get current configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let scanner = state.scanner.get_config().await;
    Json(ConfigResponse {
        config: state.config.clone(),
        active_subnet: scanner.subnet,
    })
}

/// List available network interfaces
pub async fn list_interfaces() -> impl IntoResponse {
    Json(interfaces::local_interfaces())
}

/// Request to update scan subnet
///
/// `subnet` is either CIDR (`10.0.0.0/24`) or a bare address with `prefix_len`.
#[derive(Deserialize)]
pub struct UpdateSubnetRequest {
    pub subnet: String,
    #[serde(default)]
    pub prefix_len: Option<u8>,
}

impl UpdateSubnetRequest {
    fn parse(&self) -> Result<Subnet, String> {
        match self.prefix_len {
            Some(prefix) => {
                let addr: Ipv4Addr = self
                    .subnet
                    .parse()
                    .map_err(|_| format!("Invalid subnet address: {}", self.subnet))?;
                Subnet::new(addr, prefix).map_err(|e| e.to_string())
            }
            None => self.subnet.parse().map_err(|e: lanwatch_core::ProbeError| e.to_string()),
        }
    }
}

/// Update the scan subnet configuration
pub async fn update_subnet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateSubnetRequest>,
) -> impl IntoResponse {
    let subnet = match req.parse() {
        Ok(subnet) => subnet,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ApiError::new(e))).into_response(),
    };

    state.scanner.update_subnet(subnet).await;

    Json(serde_json::json!({
        "status": "updated",
        "subnet": subnet,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::router;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use lanwatch_core::{Observation, ObservationMap, ProbeOutcome};
    use lanwatch_discovery::{DeviceRegistry, DiscoveryScanner, ProbeSet, ScannerConfig};
    use std::collections::BTreeSet;
    use tower::ServiceExt;

    /// One printer on the link layer; everything else is silent
    struct StaticProbes;

    #[async_trait]
    impl ProbeSet for StaticProbes {
        async fn link_layer_sweep(&self, _subnet: Subnet) -> ProbeOutcome {
            let mut map = ObservationMap::new();
            map.insert(
                Ipv4Addr::new(192, 168, 1, 10),
                Observation::new(Some("aa:bb:cc:dd:ee:ff".to_string()), Some("printer.local".to_string())),
            );
            ProbeOutcome::Success(map)
        }

        async fn reachability_sweep(&self, _subnet: Subnet, _known: &BTreeSet<Ipv4Addr>) -> ProbeOutcome {
            ProbeOutcome::Success(ObservationMap::new())
        }

        async fn multicast_discovery(&self) -> ProbeOutcome {
            ProbeOutcome::Success(ObservationMap::new())
        }

        async fn reverse_name(&self, _ip: Ipv4Addr) -> Option<String> {
            None
        }

        async fn is_reachable(&self, _ip: Ipv4Addr) -> bool {
            false
        }

        async fn resolve_link_address(&self, _ip: Ipv4Addr) -> Option<String> {
            None
        }
    }

    fn test_state() -> Arc<AppState> {
        let scanner = Arc::new(DiscoveryScanner::new(
            ScannerConfig::default(),
            Arc::new(StaticProbes),
            Arc::new(DeviceRegistry::in_memory()),
        ));
        AppState::with_scanner(Config::default(), scanner)
    }

    async fn send(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_scan_then_list_devices() {
        let state = test_state();

        let (status, body) = send(state.clone(), post_json("/api/scan", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["devices_found"], 1);

        let (status, body) = send(state, get("/api/devices")).await;
        assert_eq!(status, StatusCode::OK);
        let printer = &body["192.168.1.10"];
        assert_eq!(printer["mac"], "aa:bb:cc:dd:ee:ff");
        assert_eq!(printer["name"], "printer.local");
        assert_eq!(printer["status"], "online");
        assert!(printer["last_seen"].is_string());
        assert!(printer["first_seen"].is_string());
    }

    #[tokio::test]
    async fn test_refresh_invalid_address() {
        let (status, body) = send(test_state(), get("/api/devices/not-an-ip/refresh")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().starts_with("Error: invalid address not-an-ip"));
    }

    #[tokio::test]
    async fn test_refresh_unreachable_device() {
        let (status, body) = send(
            test_state(),
            post_json("/api/devices/192.168.1.99/refresh", serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Device 192.168.1.99 is offline");
    }

    #[tokio::test]
    async fn test_update_subnet() {
        let state = test_state();

        let (status, body) = send(
            state.clone(),
            post_json("/api/subnet", serde_json::json!({"subnet": "10.4.0.9", "prefix_len": 16})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subnet"], "10.4.0.0/16");

        let (_, config) = send(state, get("/api/config")).await;
        assert_eq!(config["active_subnet"], "10.4.0.0/16");
        assert_eq!(config["daemon"]["bind"], "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_update_subnet_rejects_garbage() {
        let (status, body) = send(
            test_state(),
            post_json("/api/subnet", serde_json::json!({"subnet": "10.0.0.0/99"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_update_subnet_rejects_oversized_ranges() {
        let state = test_state();

        for request in [
            serde_json::json!({"subnet": "0.0.0.0/0"}),
            serde_json::json!({"subnet": "10.0.0.0", "prefix_len": 8}),
        ] {
            let (status, body) = send(state.clone(), post_json("/api/subnet", request)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"].as_str().unwrap().contains("/16"));
        }

        assert_eq!(state.scanner.get_config().await.subnet, Subnet::default_lan());
    }
}
