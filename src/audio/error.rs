use thiserror::Error;

use crate::sources::ProviderError;

/// Fallos al adquirir o usar el transporte de voz
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("no se pudo conectar al canal de voz: {0}")]
    Join(String),

    #[error("el transporte de voz ya no está disponible")]
    Closed,
}

/// Fallos al construir un pipeline de audio
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no se pudo iniciar el transcoder: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("el transcoder no expuso {0}")]
    MissingPipe(&'static str),

    #[error("el transcoder terminó con error: {0}")]
    TranscoderExit(String),

    #[error("error del encoder Opus: {0}")]
    Encoder(String),

    #[error("no se pudo abrir la fuente: {0}")]
    Source(#[from] ProviderError),

    #[error("no se pudo abrir el transporte: {0}")]
    Sink(#[from] VoiceError),
}

/// Errores que el core convierte en respuestas para el usuario
#[derive(Debug, Error)]
pub enum MusicError {
    #[error("búsqueda fallida: {0}")]
    Search(#[source] ProviderError),

    #[error("sin resultados")]
    NoResults,

    #[error(transparent)]
    VoiceJoin(VoiceError),

    #[error("no se pudo reproducir '{title}': {source}")]
    PipelineSpawn {
        title: String,
        #[source]
        source: PipelineError,
    },

    #[error("la selección ya no está disponible")]
    ExpiredSelection,

    #[error("opción fuera de rango (1-{0})")]
    ChoiceOutOfRange(usize),

    #[error("no hay nada reproduciéndose")]
    NothingPlaying,

    #[error("no se pudo obtener la letra: {0}")]
    Lyrics(#[source] ProviderError),

    #[error("la cola fue retirada")]
    QueueRetired,
}
