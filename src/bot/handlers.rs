use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponseFollowup, EditInteractionResponse},
    model::{
        application::{CommandDataOption, CommandInteraction, ComponentInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::fmt;
use tracing::{debug, error, info};

use crate::{
    admission::{Admission, Command, SPAM_WARNING},
    bot::JukeboxBot,
    error::PlaybackError,
    ui::{buttons, embeds},
};

/// Error de uso detectado antes de crear el comando
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    NotInVoice,
    MissingValue,
    Unknown,
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInVoice => write!(f, "🔇 Tienes que estar en un canal de voz"),
            Self::MissingValue => write!(f, "❌ Falta el valor del comando"),
            Self::Unknown => write!(f, "❌ Comando no reconocido"),
        }
    }
}

/// Datos de una invocación ya extraídos de la interacción
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub name: &'a str,
    pub index: Option<i64>,
    pub playlist: Option<&'a str>,
    pub level: Option<i64>,
    pub voice_channel: Option<ChannelId>,
    pub text_channel: ChannelId,
}

/// Convierte una invocación de slash command en un `Command`.
///
/// `index` llega 1-based desde Discord; `level` se recorta a 0..=100.
pub fn to_command(invocation: Invocation<'_>) -> Result<Command, UsageError> {
    let command = match invocation.name {
        "join" => Command::Join {
            channel_id: invocation.voice_channel.ok_or(UsageError::NotInVoice)?,
            text_channel_id: invocation.text_channel,
        },
        "leave" => Command::Leave,
        "play" => Command::Play {
            index: invocation
                .index
                .and_then(|i| usize::try_from(i).ok())
                .map(|i| i.saturating_sub(1)),
            playlist: invocation
                .playlist
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from),
            channel_id: invocation.voice_channel,
            text_channel_id: invocation.text_channel,
        },
        "pause" => Command::Pause,
        "volume" => {
            let level = invocation.level.ok_or(UsageError::MissingValue)?;
            Command::Volume {
                percent: u8::try_from(level.clamp(0, 100)).unwrap_or(100),
            }
        }
        "skip" => Command::Skip,
        "previous" => Command::Previous,
        "stop" => Command::Stop,
        "shuffle" => Command::Shuffle,
        "loop" => Command::Loop,
        "queue" => Command::Queue,
        "nowplaying" => Command::NowPlaying,
        "playlists" => Command::Playlists,
        _ => return Err(UsageError::Unknown),
    };
    Ok(command)
}

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &JukeboxBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // Defer: unirse a voz o esperar turno en la cola puede tardar más de 3s
    command.defer(&ctx.http).await?;

    let invocation = Invocation {
        name: command.data.name.as_str(),
        index: option(&command.data.options, "index").and_then(|o| o.value.as_i64()),
        playlist: option(&command.data.options, "playlist").and_then(|o| o.value.as_str()),
        level: option(&command.data.options, "level").and_then(|o| o.value.as_i64()),
        voice_channel: user_voice_channel(ctx, guild_id, command.user.id),
        text_channel: command.channel_id,
    };

    let parsed = match to_command(invocation) {
        Ok(parsed) => parsed,
        Err(usage) => {
            command
                .edit_response(&ctx.http, EditInteractionResponse::new().content(usage.to_string()))
                .await?;
            return Ok(());
        }
    };

    let response = match bot.admission.admit(guild_id, command.user.id, parsed).await {
        Admission::Dropped { warn: false } => {
            command.delete_response(&ctx.http).await?;
            return Ok(());
        }
        Admission::Dropped { warn: true } => EditInteractionResponse::new().content(SPAM_WARNING),
        Admission::Answered(Ok(reply)) => EditInteractionResponse::new()
            .embed(embeds::reply_embed(&reply))
            .components(buttons::create_player_buttons(&reply.snapshot)),
        Admission::Answered(Err(error)) => {
            log_rejection(guild_id, &error);
            EditInteractionResponse::new().embed(embeds::error_embed(&error))
        }
    };

    command.edit_response(&ctx.http, response).await?;
    Ok(())
}

/// Maneja los botones del reproductor
pub async fn handle_component(ctx: &Context, component: ComponentInteraction, bot: &JukeboxBot) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Componente usado fuera de un servidor"))?;

    info!(
        "🔘 Botón {} presionado por {} en guild {}",
        component.data.custom_id, component.user.name, guild_id
    );

    component.defer(&ctx.http).await?;

    let Some(parsed) = buttons::button_command(&component.data.custom_id) else {
        return followup(ctx, &component, "❌ Acción no reconocida").await;
    };

    match bot.admission.admit(guild_id, component.user.id, parsed).await {
        Admission::Dropped { warn: false } => Ok(()),
        Admission::Dropped { warn: true } => followup(ctx, &component, SPAM_WARNING).await,
        Admission::Answered(Ok(reply)) => {
            component
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new()
                        .embed(embeds::reply_embed(&reply))
                        .components(buttons::create_player_buttons(&reply.snapshot)),
                )
                .await?;
            Ok(())
        }
        Admission::Answered(Err(error)) => {
            log_rejection(guild_id, &error);
            followup(ctx, &component, &error.to_string()).await
        }
    }
}

/// Respuesta efímera solo para quien pulsó el botón
async fn followup(ctx: &Context, component: &ComponentInteraction, content: &str) -> Result<()> {
    component
        .create_followup(
            &ctx.http,
            CreateInteractionResponseFollowup::new()
                .content(content)
                .ephemeral(true),
        )
        .await?;
    Ok(())
}

fn option<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a CommandDataOption> {
    options.iter().find(|opt| opt.name == name)
}

/// Canal de voz del usuario según la caché de serenity
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    let channel = guild.voice_states.get(&user_id)?.channel_id;
    channel
}

fn log_rejection(guild_id: GuildId, error: &PlaybackError) {
    if error.is_operational() {
        error!("❌ Guild {}: {}", guild_id, error);
    } else {
        debug!("Guild {}: comando rechazado: {}", guild_id, error);
    }
}
