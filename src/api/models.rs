//! API data models

use serde::{Deserialize, Serialize};

/// Query parameters for `POST /audio`
#[derive(Debug, Default, Deserialize)]
pub struct AudioParams {
    pub bitrate: Option<String>,
}

/// Query parameters for `POST /keyframes`
#[derive(Debug, Default, Deserialize)]
pub struct KeyframeParams {
    /// Minimum gap between selected frames, in seconds
    pub gap: Option<String>,
}

/// Health check payload
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

/// Body of every error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
