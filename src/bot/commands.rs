use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, application::Command as ApplicationCommand, id::GuildId},
    prelude::Context,
};

fn all_commands() -> Vec<CreateCommand> {
    vec![
        join_command(),
        leave_command(),
        play_command(),
        pause_command(),
        skip_command(),
        previous_command(),
        stop_command(),
        shuffle_command(),
        loop_command(),
        volume_command(),
        queue_command(),
        nowplaying_command(),
        playlists_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    ApplicationCommand::set_global_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

// Comandos de conexión

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Conecta el bot a tu canal de voz")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Desconecta el bot del canal de voz")
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce la biblioteca o una playlist")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "index",
                "Posición en la cola (empieza en 1)",
            )
            .min_int_value(1),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::String,
            "playlist",
            "Nombre de la playlist a cargar",
        ))
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la canción actual; /play la reanuda")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn previous_command() -> CreateCommand {
    CreateCommand::new("previous").description("Vuelve a la canción anterior")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción y sale del canal")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Activa o desactiva el modo aleatorio")
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop").description("Repite la canción actual")
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Cambia el volumen del reproductor")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "level", "Volumen de 0 a 100")
                .min_int_value(0)
                .max_int_value(100)
                .required(true),
        )
}

// Comandos de información

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Muestra la canción actual")
}

fn playlists_command() -> CreateCommand {
    CreateCommand::new("playlists").description("Lista las playlists disponibles")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_every_command_kind_is_registered() {
        let names: Vec<String> = all_commands()
            .iter()
            .map(|c| serde_json::to_value(c).unwrap()["name"].as_str().unwrap().to_string())
            .collect();

        assert_eq!(
            names,
            vec![
                "join", "leave", "play", "pause", "skip", "previous", "stop", "shuffle", "loop",
                "volume", "queue", "nowplaying", "playlists"
            ]
        );
    }
}
