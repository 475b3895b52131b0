//! Client for the backend's music playback endpoints.
//!
//! The backend holds the streaming-service credentials; this client only
//! asks it to start a class-specific playlist, pause, or list devices.

use crate::config::PlaylistConfig;
use crate::core::EmotionClass;
use serde::{Deserialize, Serialize};

/// Playlist client error types.
#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    /// Client construction failed
    #[error("Playlist config error: {0}")]
    Config(String),
    /// Network/HTTP error
    #[error("Playlist network error: {0}")]
    Network(String),
    /// Server returned an error response
    #[error("Playlist server error ({status}): {message}")]
    Server { status: u16, message: String },
    /// JSON decoding error
    #[error("Playlist serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Serialize)]
struct PlayRequest<'a> {
    emotion: &'a str,
}

/// Acknowledgement returned by play and pause.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybackAck {
    #[serde(default)]
    pub message: Option<String>,
}

/// A playback device known to the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaybackDevice {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub volume_percent: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(default)]
    devices: Vec<PlaybackDevice>,
}

/// Async client for the playback endpoints.
pub struct PlaylistClient {
    base_url: String,
    client: reqwest::Client,
}

impl PlaylistClient {
    pub fn new(config: &PlaylistConfig) -> Result<Self, PlaylistError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PlaylistError::Config(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start the playlist for `class`.
    pub async fn play(&self, class: EmotionClass) -> Result<PlaybackAck, PlaylistError> {
        let response = self
            .client
            .post(format!("{}/api/spotify/play", self.base_url))
            .json(&PlayRequest {
                emotion: class.playlist_key(),
            })
            .send()
            .await
            .map_err(|e| PlaylistError::Network(e.to_string()))?;

        Self::decode(response).await
    }

    /// Pause playback.
    pub async fn pause(&self) -> Result<PlaybackAck, PlaylistError> {
        let response = self
            .client
            .get(format!("{}/api/spotify/pause", self.base_url))
            .send()
            .await
            .map_err(|e| PlaylistError::Network(e.to_string()))?;

        Self::decode(response).await
    }

    /// List playback devices.
    pub async fn devices(&self) -> Result<Vec<PlaybackDevice>, PlaylistError> {
        let response = self
            .client
            .get(format!("{}/api/spotify/devices", self.base_url))
            .send()
            .await
            .map_err(|e| PlaylistError::Network(e.to_string()))?;

        let list: DeviceList = Self::decode(response).await?;
        Ok(list.devices)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PlaylistError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PlaylistError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| PlaylistError::Serialization(e.to_string()))
    }
}
