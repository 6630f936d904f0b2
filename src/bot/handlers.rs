use regex::Regex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};
use tracing::{debug, info};

use crate::{
    audio::{queue::Queue, Choice, Enqueued, MusicError, MusicService},
    cache::SearchKey,
    sources::{ProviderError, Track},
    ui::{
        embeds::{format_duration, queue_line, track_line, truncate},
        messages,
    },
};

const MAX_LYRICS_CHARS: usize = 4000;

/// Quién pidió el comando y desde dónde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandContext {
    pub guild_id: GuildId,
    pub text_channel_id: ChannelId,
    pub user_id: UserId,
    /// Canal de voz en el que está el usuario, si está en alguno
    pub voice_channel_id: Option<ChannelId>,
}

impl CommandContext {
    pub fn search_key(&self) -> SearchKey {
        SearchKey::new(self.text_channel_id, self.user_id)
    }
}

/// Respuesta estructurada de un comando, lista para renderizar
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub text: String,
    pub track: Option<Track>,
    pub candidates: Vec<Candidate>,
}

/// Opción seleccionable de una búsqueda (1..=N; 0 cancela)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub index: usize,
    pub track: Track,
}

impl Response {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_track(text: impl Into<String>, track: Track) -> Self {
        Self {
            text: text.into(),
            track: Some(track),
            ..Default::default()
        }
    }
}

impl From<MusicError> for Response {
    fn from(error: MusicError) -> Self {
        match error {
            MusicError::NoResults => Response::text(messages::NO_RESULTS),
            MusicError::VoiceJoin(e) => Response::text(format!("❌ {}", e)),
            MusicError::PipelineSpawn { title, .. } => {
                Response::text(format!("❌ No se pudo reproducir **{}**.", title))
            }
            MusicError::ExpiredSelection => Response::text(messages::EXPIRED_SELECTION),
            MusicError::ChoiceOutOfRange(max) => Response::text(format!(
                "❌ Elige un número entre 1 y {}, o `0` para cancelar.",
                max
            )),
            MusicError::NothingPlaying => Response::text(messages::NOTHING_PLAYING),
            MusicError::Lyrics(ProviderError::NotFound) => Response::text(messages::NO_LYRICS),
            MusicError::QueueRetired => Response::text(messages::QUEUE_RETIRED),
            MusicError::Search(_) | MusicError::Lyrics(_) => Response::text(messages::ERROR),
        }
    }
}

fn enqueued_response(enqueued: Enqueued) -> Response {
    let line = track_line(&enqueued.track);
    let text = if enqueued.position == 0 {
        format!("▶️ Reproduciendo: {}", line)
    } else {
        format!("➕ Agregada a la cola (#{}): {}", enqueued.position, line)
    };
    Response::with_track(text, enqueued.track)
}

static CLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?::(\d{1,2}))?(?::(\d{1,2}))?$").ok());

/// Acepta `SS`, `MM:SS`, `HH:MM:SS` o una duración como `1m30s`
pub fn parse_seek(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Some(caps) = CLOCK.as_ref().and_then(|clock| clock.captures(input)) {
        let mut parts = Vec::with_capacity(3);
        for part in caps.iter().skip(1).flatten() {
            parts.push(part.as_str().parse::<u64>().ok()?);
        }

        let secs = match parts.as_slice() {
            [s] => Some(*s),
            [m, s] if *s < 60 => m.checked_mul(60)?.checked_add(*s),
            [h, m, s] if *m < 60 && *s < 60 => h
                .checked_mul(3600)?
                .checked_add(m * 60)?
                .checked_add(*s),
            _ => None,
        };
        return secs.map(Duration::from_secs);
    }

    humantime::parse_duration(input).ok()
}

impl MusicService {
    /// Cola del llamador, exigiendo que esté en el mismo canal de voz
    async fn caller_queue(&self, ctx: &CommandContext) -> Result<Arc<Queue>, Response> {
        let Some(voice_channel) = ctx.voice_channel_id else {
            return Err(Response::text(messages::NO_VOICE_CHANNEL));
        };
        let Some(queue) = self.get_queue(ctx.guild_id).await else {
            return Err(Response::text(messages::NOTHING_PLAYING));
        };
        if queue.voice_channel_id().await != voice_channel {
            return Err(Response::text(messages::SAME_VOICE_CHANNEL));
        }
        Ok(queue)
    }

    pub async fn handle_play(&self, ctx: &CommandContext, args: &str) -> Response {
        let query = args.trim();
        if query.is_empty() {
            return Response::text(messages::NO_KEYWORDS);
        }
        let Some(voice_channel) = ctx.voice_channel_id else {
            return Response::text(messages::NO_VOICE_CHANNEL);
        };

        info!("🎵 play '{}' en guild {}", query, ctx.guild_id);
        match self.play_to_vc(query, voice_channel, ctx.guild_id).await {
            Ok(enqueued) => enqueued_response(enqueued),
            Err(e) => e.into(),
        }
    }

    pub async fn handle_search(&self, ctx: &CommandContext, args: &str) -> Response {
        let query = args.trim();
        if query.is_empty() {
            return Response::text(messages::NO_KEYWORDS);
        }

        match self.search(query, ctx.search_key()).await {
            Ok(tracks) => Response {
                text: format!("🔍 Resultados para **{}**", query),
                track: None,
                candidates: tracks
                    .into_iter()
                    .enumerate()
                    .map(|(i, track)| Candidate { index: i + 1, track })
                    .collect(),
            },
            Err(e) => e.into(),
        }
    }

    pub async fn handle_choose_track(&self, ctx: &CommandContext, index: usize) -> Response {
        // Cancelar no requiere estar en un canal de voz
        let voice_channel = match (index, ctx.voice_channel_id) {
            (_, Some(channel)) => channel,
            (0, None) => ctx.text_channel_id,
            (_, None) => return Response::text(messages::NO_VOICE_CHANNEL),
        };

        match self
            .choose_track(ctx.search_key(), index, ctx.guild_id, voice_channel)
            .await
        {
            Ok(Choice::Cancelled) => Response::text(messages::SEARCH_CANCELLED),
            Ok(Choice::Enqueued(enqueued)) => enqueued_response(enqueued),
            Err(e) => e.into(),
        }
    }

    pub async fn handle_skip(&self, ctx: &CommandContext) -> Response {
        let queue = match self.caller_queue(ctx).await {
            Ok(queue) => queue,
            Err(response) => return response,
        };

        match queue.skip().await {
            Ok(Some(next)) => Response::with_track(
                format!("{}\n▶️ Ahora: {}", messages::SKIPPED, track_line(&next)),
                next,
            ),
            Ok(None) => Response::text(format!("{}\n{}", messages::SKIPPED, messages::QUEUE_FINISHED)),
            Err(e) => e.into(),
        }
    }

    pub async fn handle_seek(&self, ctx: &CommandContext, args: &str) -> Response {
        let Some(offset) = parse_seek(args) else {
            return Response::text(messages::INVALID_SEEK);
        };
        let queue = match self.caller_queue(ctx).await {
            Ok(queue) => queue,
            Err(response) => return response,
        };
        let Some(track) = queue.now_playing().await else {
            return Response::text(messages::NOTHING_PLAYING);
        };

        if !track.duration().is_zero() && offset >= track.duration() {
            return Response::text(messages::SEEK_PAST_END);
        }

        match queue.seek(offset).await {
            Ok(()) => Response::with_track(
                format!("⏩ Saltando a `{}` en {}", format_duration(offset), track_line(&track)),
                track,
            ),
            Err(e) => e.into(),
        }
    }

    pub async fn handle_queue(&self, ctx: &CommandContext) -> Response {
        let Some(queue) = self.get_queue(ctx.guild_id).await else {
            return Response::text(messages::NOTHING_PLAYING);
        };

        let tracks = queue.tracks().await;
        if tracks.is_empty() {
            return Response::text(messages::QUEUE_EMPTY);
        }

        let mut lines: Vec<String> = tracks
            .iter()
            .enumerate()
            .map(|(i, track)| queue_line(i, track))
            .collect();
        if let (Some(first), Some(position)) = (lines.first_mut(), queue.position().await) {
            first.push_str(&format!(" · `{}`", format_duration(position)));
        }

        Response {
            text: format!("📋 **Cola** ({} canciones)\n{}", tracks.len(), lines.join("\n")),
            track: tracks.into_iter().next(),
            candidates: Vec::new(),
        }
    }

    pub async fn handle_clear(&self, ctx: &CommandContext) -> Response {
        match self.caller_queue(ctx).await {
            Ok(queue) => {
                let removed = queue.clear().await;
                debug!("🗑️ clear en guild {}: {} tracks", ctx.guild_id, removed);
                Response::text(messages::CLEARED)
            }
            Err(response) => response,
        }
    }

    pub async fn handle_leave(&self, ctx: &CommandContext) -> Response {
        match self.caller_queue(ctx).await {
            Ok(_) => {
                self.delete_queue(ctx.guild_id).await;
                Response::text(messages::LEFT)
            }
            Err(response) => response,
        }
    }

    pub async fn handle_lyrics(&self, ctx: &CommandContext) -> Response {
        let now_playing = match self.get_queue(ctx.guild_id).await {
            Some(queue) => queue.now_playing().await,
            None => None,
        };
        let Some(track) = now_playing else {
            return Response::text(messages::NOTHING_PLAYING);
        };

        match self.lyrics(&track).await {
            Ok(lyrics) => Response::with_track(
                format!(
                    "📝 {}\n\n{}",
                    track_line(&track),
                    truncate(&lyrics, MAX_LYRICS_CHARS)
                ),
                track,
            ),
            Err(e) => e.into(),
        }
    }
}
