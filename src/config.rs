use anyhow::{Context, Result};
use std::time::Duration;

use crate::audio::{PipelineConfig, ServiceSettings};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub prefix: String,
    pub color: u32,

    // Búsqueda
    pub max_search_results: usize,
    pub search_cache_size: usize,
    pub search_ttl_secs: u64,

    // Audio
    pub packet_buffer_frames: usize,
    pub opus_bitrate: i32,

    // Herramientas externas
    pub ffmpeg_path: String,
    pub ytdlp_path: String,
    pub lyrics_api_url: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN es obligatorio")?,
            prefix: std::env::var("PREFIX").unwrap_or_else(|_| "$".to_string()),
            color: parse_color(&std::env::var("COLOR").unwrap_or_else(|_| "FF73A8".to_string()))?,

            // Búsqueda
            max_search_results: std::env::var("MAX_SEARCH_RESULTS")
                .unwrap_or_else(|_| "9".to_string())
                .parse()?,
            search_cache_size: std::env::var("SEARCH_CACHE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            search_ttl_secs: std::env::var("SEARCH_TTL_SECS")
                .unwrap_or_else(|_| "900".to_string()) // 15 minutos
                .parse()?,

            // Audio
            packet_buffer_frames: std::env::var("PACKET_BUFFER_FRAMES")
                .unwrap_or_else(|_| "450".to_string()) // ~9s a 20ms por frame
                .parse()?,
            opus_bitrate: std::env::var("OPUS_BITRATE")
                .unwrap_or_else(|_| "128000".to_string())
                .parse()?,

            // Herramientas externas
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            lyrics_api_url: std::env::var("LYRICS_API_URL")
                .unwrap_or_else(|_| "https://lrclib.net/api".to_string()),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - Prefix must be 1 to 5 characters
    /// - Search results must fit a single digit (1-9)
    /// - Opus bitrate must be between 8kbps and 510kbps
    /// - Cache and buffer sizes must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must be set");
        }

        let prefix_len = self.prefix.chars().count();
        if prefix_len == 0 || prefix_len > 5 {
            anyhow::bail!("Prefix must be between 1 and 5 characters long, got: {:?}", self.prefix);
        }

        if !(1..=9).contains(&self.max_search_results) {
            anyhow::bail!(
                "Max search results must be between 1 and 9, got: {}",
                self.max_search_results
            );
        }

        if self.opus_bitrate > 510_000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8_000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.search_cache_size == 0 {
            anyhow::bail!("Search cache size must be greater than 0");
        }

        if self.packet_buffer_frames == 0 {
            anyhow::bail!("Packet buffer must hold at least one frame");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: prefix '{}', color #{:06X}\n  \
            Search: {} results, {} pending searches, {}\n  \
            Audio: {}kbps, {} frame buffer ({}ms)\n  \
            Tools: ffmpeg={}, yt-dlp={}, lyrics={}",
            self.prefix,
            self.color,
            self.max_search_results,
            self.search_cache_size,
            self.search_ttl()
                .map_or("no TTL".to_string(), |ttl| format!("{}s TTL", ttl.as_secs())),
            self.opus_bitrate / 1000,
            self.packet_buffer_frames,
            self.packet_buffer_frames * 20,
            self.ffmpeg_path,
            self.ytdlp_path,
            self.lyrics_api_url
        )
    }

    pub fn search_ttl(&self) -> Option<Duration> {
        (self.search_ttl_secs > 0).then(|| Duration::from_secs(self.search_ttl_secs))
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            max_search_results: self.max_search_results,
            search_cache_size: self.search_cache_size,
            search_ttl: self.search_ttl(),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            buffer_frames: self.packet_buffer_frames,
            bitrate: self.opus_bitrate,
        }
    }
}

/// Color hex como `FF73A8` o `#FF73A8`
fn parse_color(value: &str) -> Result<u32> {
    let hex = value.trim().trim_start_matches('#');
    let color = u32::from_str_radix(hex, 16).with_context(|| format!("COLOR inválido: {}", value))?;
    if color > 0xFF_FF_FF {
        anyhow::bail!("COLOR fuera de rango: {}", value);
    }
    Ok(color)
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin default para el token)
            discord_token: String::new(),
            prefix: "$".to_string(),
            color: 0xFF73A8,

            // Búsqueda
            max_search_results: 9,
            search_cache_size: 100,
            search_ttl_secs: 900,

            // Audio
            packet_buffer_frames: 450,
            opus_bitrate: 128_000,

            // Herramientas externas
            ffmpeg_path: "ffmpeg".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            lyrics_api_url: "https://lrclib.net/api".to_string(),
        }
    }
}
