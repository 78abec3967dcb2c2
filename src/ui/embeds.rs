use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::{
    admission::{CommandReply, Outcome},
    error::PlaybackError,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Local Jukebox";

/// Embed de respuesta a un comando ejecutado
pub fn reply_embed(reply: &CommandReply) -> CreateEmbed {
    let colour = match &reply.outcome {
        Outcome::Playing { .. } | Outcome::NowPlaying | Outcome::Resumed => colors::MUSIC_PURPLE,
        Outcome::Joined { .. } | Outcome::Shuffle(_) | Outcome::Loop(_) => colors::SUCCESS_GREEN,
        Outcome::Queue | Outcome::Playlists(_) | Outcome::Volume(_) => colors::INFO_BLUE,
        Outcome::Left
        | Outcome::Stopped
        | Outcome::QueueEnded
        | Outcome::Paused
        | Outcome::Unchanged => colors::NEUTRAL_GRAY,
    };
    let colour = if reply.incidents.is_empty() {
        colour
    } else {
        colors::WARNING_ORANGE
    };

    let mut embed = CreateEmbed::default()
        .description(reply.to_string())
        .colour(colour)
        .timestamp(Timestamp::now());

    if let Some(playlist) = &reply.snapshot.playlist {
        embed = embed.footer(CreateEmbedFooter::new(format!("{} · 📂 {}", STANDARD_FOOTER, playlist)));
    } else {
        embed = embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }
    embed
}

/// Embed de error; los rechazos por carga se muestran como aviso
pub fn error_embed(error: &PlaybackError) -> CreateEmbed {
    let colour = match error {
        PlaybackError::Busy { .. } | PlaybackError::CoolingDown { .. } | PlaybackError::NothingPlaying => {
            colors::WARNING_ORANGE
        }
        _ => colors::ERROR_RED,
    };

    CreateEmbed::default()
        .description(error.to_string())
        .colour(colour)
        .timestamp(Timestamp::now())
}
