use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;

use super::error::VoiceError;

/// Canal de salida hacia el transporte: un paquete Opus de 20ms por mensaje
pub type FrameSink = flume::Sender<Bytes>;

/// Conexión de voz activa en una guild.
///
/// Cada pipeline abre su propio sink con [`VoiceHandle::open_sink`]; abrir
/// uno nuevo reemplaza al anterior en el transporte, así que solo el último
/// pipeline de la cola escribe audio.
#[async_trait]
pub trait VoiceHandle: Send + Sync {
    fn guild_id(&self) -> GuildId;

    fn channel_id(&self) -> ChannelId;

    /// Abre el sink de salida para un nuevo pipeline
    async fn open_sink(&self) -> Result<FrameSink, VoiceError>;

    /// Libera la conexión. Idempotente.
    async fn disconnect(&self);
}

/// Proveedor de transportes de voz (join idempotente por guild)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceProvider: Send + Sync {
    async fn join_or_get(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceHandle>, VoiceError>;
}
