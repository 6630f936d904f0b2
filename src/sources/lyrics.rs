use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ProviderError, Track};

/// Cliente mínimo de LRCLIB para letras sin sincronizar
#[derive(Debug, Clone)]
pub struct LrcLibClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LrcLibResponse {
    plain_lyrics: Option<String>,
    #[serde(default)]
    instrumental: bool,
}

impl LrcLibClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("guild-tunes/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn lookup_url(&self, track: &Track) -> Result<Url, ProviderError> {
        let mut params = vec![
            ("artist_name", track.artist().to_string()),
            ("track_name", track.title().to_string()),
        ];
        if let Some(album) = track.album() {
            params.push(("album_name", album.to_string()));
        }
        if !track.duration().is_zero() {
            params.push(("duration", track.duration().as_secs().to_string()));
        }

        Url::parse_with_params(&format!("{}/get", self.base_url), &params)
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }

    /// Obtiene la letra de un track
    pub async fn fetch(&self, track: &Track) -> Result<String, ProviderError> {
        let url = self.lookup_url(track)?;
        debug!("📝 Buscando letra: {}", url);

        let response = self.http.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound);
        }

        let body: LrcLibResponse = response.error_for_status()?.json().await?;
        if body.instrumental {
            return Ok("🎼 (Instrumental)".to_string());
        }

        body.plain_lyrics
            .filter(|lyrics| !lyrics.trim().is_empty())
            .ok_or(ProviderError::NotFound)
    }
}
