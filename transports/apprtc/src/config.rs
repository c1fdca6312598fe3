//! Configuration types for the AppRTC streamer

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Origin of the public AppRTC deployment
pub const DEFAULT_ORIGIN: &str = "https://appr.tc";

/// Main configuration for a streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Base URL of the signaling service (http:// or https://)
    ///
    /// Used both to build the REST endpoints and as the `Origin` header of the
    /// relay socket; the service rejects relay connections from other origins.
    pub origin: String,

    /// Room to join (random 9-digit id if None)
    pub room_id: Option<String>,

    /// Video framerate in fps (default: 30)
    pub frame_rate: u32,

    /// Force a key frame every N frames (default: 10)
    pub key_frame_interval: u32,

    /// Timeout for each REST call in seconds (default: 30)
    pub http_timeout_secs: u64,

    /// Track id of the outbound video track (default: "video")
    pub video_track_id: String,

    /// Stream id of the outbound video track (generated if None)
    pub video_stream_id: Option<String>,

    /// ICE servers used when the service returns an empty ICE list
    pub ice_fallback_servers: Vec<String>,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            room_id: None,
            frame_rate: 30,
            key_frame_interval: 10,
            http_timeout_secs: 30,
            video_track_id: "video".to_string(),
            video_stream_id: None,
            ice_fallback_servers: Vec::new(),
        }
    }
}

impl StreamerConfig {
    /// Preset for interactive use: shorter key-frame interval, quicker REST timeout
    pub fn low_latency_preset(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            frame_rate: 30,
            key_frame_interval: 5,
            http_timeout_secs: 10,
            ..Default::default()
        }
    }

    /// Preset favouring picture quality over recovery time
    pub fn high_quality_preset(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            frame_rate: 60,
            key_frame_interval: 60,
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&text).map_err(|e| {
            crate::Error::InvalidConfig(format!(
                "failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Duration of one frame at the configured rate
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }

    /// REST call timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `origin` is not an http(s) URL
    /// - `frame_rate` is not in range 1-120
    /// - `key_frame_interval` is 0
    /// - `http_timeout_secs` is 0
    /// - `room_id` is empty or contains a path separator
    /// - `video_track_id` is empty
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.origin.starts_with("http://") && !self.origin.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "origin must start with http:// or https://, got {}",
                self.origin
            )));
        }

        if self.frame_rate == 0 || self.frame_rate > 120 {
            return Err(Error::InvalidConfig(format!(
                "frame_rate must be in range 1-120, got {}",
                self.frame_rate
            )));
        }

        if self.key_frame_interval == 0 {
            return Err(Error::InvalidConfig(
                "key_frame_interval must be greater than 0".to_string(),
            ));
        }

        if self.http_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "http_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if let Some(room_id) = &self.room_id {
            if room_id.is_empty() || room_id.contains('/') {
                return Err(Error::InvalidConfig(format!(
                    "room_id must be a non-empty path segment, got {:?}",
                    room_id
                )));
            }
        }

        if self.video_track_id.is_empty() {
            return Err(Error::InvalidConfig(
                "video_track_id must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Origin without a trailing slash, ready for path concatenation
    pub(crate) fn base_url(&self) -> &str {
        self.origin.trim_end_matches('/')
    }
}
