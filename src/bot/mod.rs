//! # Bot Module
//!
//! Discord adapter for Guild Tunes.
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`]:
//! - `message`: prefix commands and single-digit search selections
//! - `ready`: presence and startup logging
//! - `voice_state_update`: reconciles forced disconnects of the bot
//!
//! Command logic lives in [`handlers`] as methods on [`MusicService`]; this
//! module only parses messages, builds the [`CommandContext`] and renders the
//! resulting [`Response`](handlers::Response).

use serenity::{
    all::{ActivityData, ChannelId, Context, EventHandler, GuildId, Message, Ready, UserId, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, error, info};

pub mod handlers;
pub mod voice;

use crate::{
    audio::{MusicService, VoiceStateChange},
    config::Config,
    ui::{embeds, messages},
};
use handlers::{CommandContext, Response};

/// Comandos de texto reconocidos tras el prefijo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Play,
    Search,
    Lyrics,
    Seek,
    Skip,
    Queue,
    Clear,
    Leave,
}

/// (comando, nombre, código corto, ayuda)
const COMMANDS: &[(Command, &str, &str, &str)] = &[
    (Command::Help, "help", "h", "muestra este mensaje"),
    (Command::Play, "play", "p", "reproduce una canción"),
    (Command::Search, "search", "f", "busca canciones para elegir una"),
    (Command::Lyrics, "lyrics", "l", "muestra la letra de la canción actual"),
    (Command::Seek, "seek", "se", "salta a un punto de la canción actual"),
    (Command::Skip, "skip", "s", "salta la canción actual"),
    (Command::Queue, "queue", "q", "muestra la cola"),
    (Command::Clear, "clear", "c", "vacía la cola"),
    (Command::Leave, "leave", "stop", "sale del canal de voz"),
];

impl Command {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        COMMANDS
            .iter()
            .find(|(_, full, short, _)| *full == name || *short == name)
            .map(|(command, ..)| *command)
    }

    pub fn name(self) -> &'static str {
        COMMANDS
            .iter()
            .find(|(command, ..)| *command == self)
            .map(|(_, full, ..)| *full)
            .unwrap_or("?")
    }
}

/// Separa `"{prefix}{comando} {args}"`; `None` si no es un comando
pub fn parse_command<'a>(prefix: &str, content: &'a str) -> Option<(Command, &'a str)> {
    let rest = content.trim().strip_prefix(prefix)?;
    let (name, args) = rest
        .split_once(char::is_whitespace)
        .unwrap_or((rest, ""));
    Command::from_name(name).map(|command| (command, args.trim()))
}

/// Un único dígito es la respuesta a una búsqueda pendiente
pub fn parse_choice(content: &str) -> Option<usize> {
    let mut chars = content.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.to_digit(10).map(|d| d as usize),
        _ => None,
    }
}

pub fn help_text(prefix: &str) -> String {
    let mut text = String::from("🎵 **Comandos**\n");
    for (_, name, short, help) in COMMANDS {
        text.push_str(&format!("`{}{}` (`{}{}`): {}\n", prefix, name, prefix, short, help));
    }
    text.push_str(&format!("\nTras `{}search`, {}", prefix, messages::SEARCH_HELP));
    text
}

/// Canal de voz en el que está el usuario, según la caché del gateway
fn voice_channel_of(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    ctx.cache
        .guild(guild_id)?
        .voice_states
        .get(&user_id)
        .and_then(|state| state.channel_id)
}

/// Manejador de eventos de Discord
pub struct MusicBot {
    config: Arc<Config>,
    service: MusicService,
}

impl MusicBot {
    pub fn new(config: Arc<Config>, service: MusicService) -> Self {
        Self { config, service }
    }

    async fn dispatch(&self, command: Command, ctx: &CommandContext, args: &str) -> Response {
        match command {
            Command::Help => Response::text(help_text(&self.config.prefix)),
            Command::Play => self.service.handle_play(ctx, args).await,
            Command::Search => self.service.handle_search(ctx, args).await,
            Command::Lyrics => self.service.handle_lyrics(ctx).await,
            Command::Seek => self.service.handle_seek(ctx, args).await,
            Command::Skip => self.service.handle_skip(ctx).await,
            Command::Queue => self.service.handle_queue(ctx).await,
            Command::Clear => self.service.handle_clear(ctx).await,
            Command::Leave => self.service.handle_leave(ctx).await,
        }
    }

    async fn reply(&self, ctx: &Context, channel_id: ChannelId, response: &Response) {
        let message = embeds::render(response, self.config.color);
        if let Err(e) = channel_id.send_message(&ctx.http, message).await {
            error!("Error al enviar respuesta en {}: {:?}", channel_id, e);
        }
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::listening(format!(
            "{}help",
            self.config.prefix
        ))));
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let command = parse_command(&self.config.prefix, &msg.content);
        let Some(guild_id) = msg.guild_id else {
            if command.is_some() {
                self.reply(&ctx, msg.channel_id, &Response::text(messages::USE_IN_SERVER))
                    .await;
            }
            return;
        };

        let command_ctx = CommandContext {
            guild_id,
            text_channel_id: msg.channel_id,
            user_id: msg.author.id,
            voice_channel_id: voice_channel_of(&ctx, guild_id, msg.author.id),
        };

        let response = if let Some((command, args)) = command {
            info!(
                "📝 Comando {} usado por {} en guild {}",
                command.name(),
                msg.author.name,
                guild_id
            );
            self.dispatch(command, &command_ctx, args).await
        } else if let Some(index) = parse_choice(&msg.content) {
            if !self.service.has_pending_search(&command_ctx.search_key()) {
                return;
            }
            debug!("🔢 Selección {} de {} en guild {}", index, msg.author.name, guild_id);
            self.service.handle_choose_track(&command_ctx, index).await
        } else {
            return;
        };

        self.reply(&ctx, msg.channel_id, &response).await;
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        let change = VoiceStateChange {
            guild_id,
            user_id: new.user_id,
            old_channel: old.and_then(|state| state.channel_id),
            new_channel: new.channel_id,
        };
        let bot_user = ctx.cache.current_user().id;

        if self.service.handle_voice_state_update(change, bot_user).await {
            info!("🔌 Bot desconectado en guild {}, cola eliminada", guild_id);
        }
    }
}
