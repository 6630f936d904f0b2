pub mod lyrics;
pub mod ytdlp;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

pub use lyrics::LrcLibClient;
pub use ytdlp::YtDlpProvider;

/// Flujo de bytes crudos de audio entregado por un proveedor
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Errores opacos de los proveedores de tracks
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no se pudo ejecutar el proveedor: {0}")]
    Io(#[from] std::io::Error),

    #[error("el proveedor terminó con error: {0}")]
    Command(String),

    #[error("error HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("respuesta inválida del proveedor: {0}")]
    Parse(String),

    #[error("no encontrado")]
    NotFound,
}

/// Contrato con el proveedor de metadata y audio.
///
/// La búsqueda devuelve candidatos ya ordenados por relevancia; el core no
/// reordena nada. `fetch_track_bytes` puede ignorar `offset` si la fuente no
/// admite lectura parcial: en ese caso `TrackStream::start` queda en cero y
/// el transcoder hace el resto del seek.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackProvider: Send + Sync {
    /// Busca tracks en la fuente
    async fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<Track>, ProviderError>;

    /// Abre el flujo de bytes de un track
    async fn fetch_track_bytes(
        &self,
        track: &Track,
        offset: Duration,
    ) -> Result<TrackStream, ProviderError>;

    /// Obtiene la letra de un track
    async fn fetch_lyrics(&self, track: &Track) -> Result<String, ProviderError>;
}

/// Bytes de un track más la posición real en la que empiezan
pub struct TrackStream {
    pub bytes: ByteStream,
    pub start: Duration,
}

impl TrackStream {
    pub fn from_start(bytes: ByteStream) -> Self {
        Self {
            bytes,
            start: Duration::ZERO,
        }
    }

    /// Cuánto debe descartar todavía el transcoder para llegar a `offset`
    pub fn remaining_seek(&self, offset: Duration) -> Duration {
        offset.saturating_sub(self.start)
    }
}

/// Representa un track de música. La identidad es el id del proveedor.
#[derive(Debug, Clone)]
pub struct Track {
    id: String,
    title: String,
    artist: String,
    album: Option<String>,
    duration: Duration,
    cover: Option<String>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: String::new(),
            album: None,
            duration: Duration::ZERO,
            cover: None,
        }
    }

    // Getters
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn artist(&self) -> &str {
        &self.artist
    }
    pub fn album(&self) -> Option<&str> {
        self.album.as_deref()
    }
    pub fn duration(&self) -> Duration {
        self.duration
    }
    pub fn cover(&self) -> Option<&str> {
        self.cover.as_deref()
    }

    // Setters
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_cover(mut self, cover: impl Into<String>) -> Self {
        self.cover = Some(cover.into());
        self
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Track {}
