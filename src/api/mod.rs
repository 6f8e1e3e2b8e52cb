//! HTTP surface: upload endpoints that answer with a progress stream,
//! a health check, and static serving of uploads and extracted outputs.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;

pub mod handlers;
pub mod models;
pub mod server;

pub use server::{router, AppState};

/// API server for the extraction endpoints
#[derive(Debug)]
pub struct ApiServer {
    config: Arc<Config>,
}

impl ApiServer {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Run the API server until it fails
    pub async fn start(self) -> Result<()> {
        info!("🚀 Starting API server on port {}", self.config.server.port);
        server::start_http_server(self.config).await
    }
}
