//! Cascade node - the main application entry point.
//!
//! Single daemon process: one shared RocksDB storage instance behind the
//! domain services, fronted by the HTTP API.

use crate::api::{self, AppContext};
use crate::error::Result;
use crate::storage::Storage;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a Cascade node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Data directory for storage
    pub data_dir: PathBuf,

    /// HTTP API listen address
    pub api_addr: SocketAddr,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(
            std::env::var("CASCADE_DATA_DIR").unwrap_or_else(|_| "./cascade-data".to_string()),
        );

        let api_addr = std::env::var("CASCADE_API_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .expect("Invalid CASCADE_API_ADDR");

        Self { data_dir, api_addr }
    }
}

/// A Cascade node instance.
pub struct Node {
    context: Arc<AppContext>,
    config: NodeConfig,
}

impl Node {
    /// Create a new node, opening (or creating) its storage.
    pub fn new(config: NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let storage = Arc::new(Storage::open(&config.data_dir)?);
        let context = Arc::new(AppContext::new(storage));

        Ok(Self { context, config })
    }

    /// Get the shared context (for API handlers).
    pub fn context(&self) -> Arc<AppContext> {
        Arc::clone(&self.context)
    }

    /// Run the node: serve the HTTP API until shutdown.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Cascade node starting");
        tracing::info!("  API: http://{}", self.config.api_addr);
        tracing::info!("  Data: {:?}", self.config.data_dir);

        let app = api::build_router(self.context);

        let listener = tokio::net::TcpListener::bind(self.config.api_addr).await?;
        tracing::info!("HTTP server listening on {}", self.config.api_addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn node_opens_storage_in_data_dir() {
        let dir = tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().join("data"),
            api_addr: "127.0.0.1:0".parse().unwrap(),
        };
        let node = Node::new(config).unwrap();
        let context = node.context();

        let service = crate::models::ExternalService::new("probe".to_string(), None);
        context.storage.put_service(&service).unwrap();
        assert!(context.storage.get_service(service.id).unwrap().is_some());
    }
}
