use async_trait::async_trait;
use futures::Stream;
use std::{
    pin::Pin,
    process::Stdio,
    task::{Context, Poll},
    time::Duration,
};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::{LrcLibClient, ProviderError, Track, TrackProvider, TrackStream};

const FIELD_SEPARATOR: char = '\t';

/// Proveedor basado en yt-dlp: búsqueda, audio crudo por stdout y letras vía LRCLIB
pub struct YtDlpProvider {
    ytdlp_path: String,
    lyrics: LrcLibClient,
}

impl YtDlpProvider {
    pub fn new(ytdlp_path: impl Into<String>, lyrics: LrcLibClient) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            lyrics,
        }
    }

    fn watch_url(id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", id)
    }

    /// Parsea una línea de `--print` con el formato id, título, canal, duración
    fn parse_search_line(line: &str) -> Option<Track> {
        let parts: Vec<&str> = line.trim().split(FIELD_SEPARATOR).collect();
        if parts.len() < 4 {
            return None;
        }

        let id = parts[0].trim();
        if id.is_empty() || id == "NA" {
            return None;
        }

        let duration = parts[3]
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_default();

        let mut track = Track::new(id, parts[1].trim())
            .with_duration(duration)
            .with_cover(format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", id));

        let artist = parts[2].trim();
        if !artist.is_empty() && artist != "NA" {
            track = track.with_artist(artist);
        }

        Some(track)
    }
}

#[async_trait]
impl TrackProvider for YtDlpProvider {
    async fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<Track>, ProviderError> {
        info!("🔍 Búsqueda yt-dlp: {}", query);

        let search_query = format!("ytsearch{}:{}", limit.max(1), query);
        let output = Command::new(&self.ytdlp_path)
            .args([
                "--print",
                "%(id)s\t%(title)s\t%(channel)s\t%(duration)s",
                "--flat-playlist",
                "--skip-download",
                "--no-playlist",
                "--quiet",
                "--no-warnings",
                "--socket-timeout",
                "15",
            ])
            .arg(&search_query)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp search failed: {}", error);
            return Err(ProviderError::Command(error.trim().to_string()));
        }

        let tracks: Vec<Track> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(Self::parse_search_line)
            .take(limit)
            .collect();

        debug!("yt-dlp devolvió {} resultados para '{}'", tracks.len(), query);
        Ok(tracks)
    }

    async fn fetch_track_bytes(
        &self,
        track: &Track,
        _offset: Duration,
    ) -> Result<TrackStream, ProviderError> {
        let mut child = Command::new(&self.ytdlp_path)
            .args([
                "-f",
                "bestaudio/best",
                "--no-playlist",
                "--quiet",
                "--no-warnings",
                "--retries",
                "3",
                "-o",
                "-",
            ])
            .arg(Self::watch_url(track.id()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Command("yt-dlp sin stdout".to_string()))?;

        debug!("⬇️ Descargando audio de {}", track.id());

        // yt-dlp no admite lectura parcial por stdout: siempre desde el inicio
        Ok(TrackStream::from_start(Box::pin(ChildStream {
            _child: child,
            inner: ReaderStream::new(stdout),
        })))
    }

    async fn fetch_lyrics(&self, track: &Track) -> Result<String, ProviderError> {
        self.lyrics.fetch(track).await
    }
}

/// Mantiene vivo el proceso mientras se consume su stdout
struct ChildStream {
    _child: Child,
    inner: ReaderStream<ChildStdout>,
}

impl Stream for ChildStream {
    type Item = std::io::Result<bytes::Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
