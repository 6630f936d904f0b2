use serenity::{
    all::Colour,
    builder::{CreateEmbed, CreateEmbedFooter, CreateMessage},
};
use std::time::Duration;

use super::messages;
use crate::{
    bot::handlers::{Candidate, Response},
    sources::Track,
};

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Tunes";

/// Límite de descripción de un embed de Discord
const MAX_DESCRIPTION: usize = 4096;

/// Convierte una respuesta de comando en un mensaje con embed
pub fn render(response: &Response, color: u32) -> CreateMessage {
    let mut embed = CreateEmbed::new()
        .description(describe(response))
        .colour(Colour::new(color));

    if let Some(track) = &response.track {
        if let Some(cover) = track.cover() {
            embed = embed.thumbnail(cover);
        }
        embed = embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    CreateMessage::new().embed(embed)
}

/// Texto completo del embed: mensaje más la lista numerada, si la hay
pub fn describe(response: &Response) -> String {
    let mut out = response.text.clone();

    if !response.candidates.is_empty() {
        for candidate in &response.candidates {
            out.push('\n');
            out.push_str(&search_line(candidate));
        }
        out.push_str("\n\n");
        out.push_str(messages::SEARCH_HELP);
    }

    truncate(&out, MAX_DESCRIPTION)
}

/// `Artista - **Título** (`m:ss`)`
pub fn track_line(track: &Track) -> String {
    let mut line = String::new();
    if !track.artist().is_empty() {
        line.push_str(track.artist());
        line.push_str(" - ");
    }
    line.push_str(&format!("**{}**", track.title()));
    if !track.duration().is_zero() {
        line.push_str(&format!(" (`{}`)", format_duration(track.duration())));
    }
    line
}

fn search_line(candidate: &Candidate) -> String {
    format!("`{}.` {}", candidate.index, track_line(&candidate.track))
}

/// Línea de la cola; el índice 0 es lo que suena ahora
pub fn queue_line(index: usize, track: &Track) -> String {
    if index == 0 {
        format!("▶️ {}", track_line(track))
    } else {
        format!("`{}.` {}", index, track_line(track))
    }
}

/// Recorta a `max` caracteres sin partir un carácter multibyte
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }

    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
