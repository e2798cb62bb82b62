use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

pub const RAG_PROVIDER: &str = "chroma";
pub const RAG_HEALTH_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagHealthState {
    Unconfigured,
    ConfiguredUnhealthy,
    ConfiguredHealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagHealthSnapshot {
    pub state: RagHealthState,
    pub provider: String,
    pub host: String,
    pub port: Option<u16>,
    pub configured: bool,
    pub healthy: bool,
    pub timeout_seconds: f64,
    pub error: Option<String>,
}

impl RagHealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        matches!(self.state, RagHealthState::ConfiguredHealthy)
    }
}

/// Abstracts the TCP reachability probe so tests don't need a live Chroma
/// server.
#[async_trait]
pub trait TcpProbe: Send + Sync {
    async fn is_reachable(&self, host: &str, port: u16, timeout: Duration) -> Result<(), String>;
}

pub struct DefaultTcpProbe;

#[async_trait]
impl TcpProbe for DefaultTcpProbe {
    async fn is_reachable(&self, host: &str, port: u16, timeout: Duration) -> Result<(), String> {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("connection timed out".to_string()),
        }
    }
}

/// `host`/`port` being absent means the integration was never configured.
pub async fn rag_health_snapshot(host: Option<String>, port: Option<u16>, probe: &dyn TcpProbe) -> RagHealthSnapshot {
    let (host, port) = match (host.filter(|h| !h.is_empty()), port) {
        (Some(h), Some(p)) => (h, p),
        (h, _) => {
            return RagHealthSnapshot {
                state: RagHealthState::Unconfigured,
                provider: RAG_PROVIDER.to_string(),
                host: h.unwrap_or_default(),
                port: None,
                configured: false,
                healthy: false,
                timeout_seconds: RAG_HEALTH_TIMEOUT.as_secs_f64(),
                error: Some("Chroma host/port not configured.".to_string()),
            };
        }
    };

    match probe.is_reachable(&host, port, RAG_HEALTH_TIMEOUT).await {
        Ok(()) => RagHealthSnapshot {
            state: RagHealthState::ConfiguredHealthy,
            provider: RAG_PROVIDER.to_string(),
            host,
            port: Some(port),
            configured: true,
            healthy: true,
            timeout_seconds: RAG_HEALTH_TIMEOUT.as_secs_f64(),
            error: None,
        },
        Err(e) => RagHealthSnapshot {
            state: RagHealthState::ConfiguredUnhealthy,
            provider: RAG_PROVIDER.to_string(),
            host,
            port: Some(port),
            configured: true,
            healthy: false,
            timeout_seconds: RAG_HEALTH_TIMEOUT.as_secs_f64(),
            error: Some(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    #[async_trait]
    impl TcpProbe for AlwaysFails {
        async fn is_reachable(&self, _host: &str, _port: u16, _timeout: Duration) -> Result<(), String> {
            Err("connection refused".to_string())
        }
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl TcpProbe for AlwaysSucceeds {
        async fn is_reachable(&self, _host: &str, _port: u16, _timeout: Duration) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn missing_host_is_unconfigured() {
        let snap = rag_health_snapshot(None, None, &AlwaysSucceeds).await;
        assert_eq!(snap.state, RagHealthState::Unconfigured);
    }

    #[tokio::test]
    async fn unreachable_host_is_configured_unhealthy() {
        let snap = rag_health_snapshot(Some("chroma".to_string()), Some(8000), &AlwaysFails).await;
        assert_eq!(snap.state, RagHealthState::ConfiguredUnhealthy);
        assert!(!snap.healthy);
    }

    #[tokio::test]
    async fn reachable_host_is_configured_healthy() {
        let snap = rag_health_snapshot(Some("chroma".to_string()), Some(8000), &AlwaysSucceeds).await;
        assert!(snap.is_healthy());
    }
}
