use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod admission;
mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod guild;
mod monitoring;
mod storage;
mod ui;

use crate::admission::AdmissionControl;
use crate::audio::{
    engine::SongbirdEngine,
    track::{Catalog, DirectoryCatalog},
    transport::SongbirdTransport,
};
use crate::bot::JukeboxBot;
use crate::config::Config;
use crate::guild::{GuildRegistry, WorkerDeps};
use crate::monitoring::HealthMonitor;
use crate::storage::PointerStore;

/// Tiempo máximo para que cada guild salga de voz al cerrar
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("local_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Local Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let catalog = Arc::new(DirectoryCatalog::new(config.music_dir.clone()));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(catalog.as_ref(), &config).await;
    }

    // Punteros por guild
    let pointers = Arc::new(PointerStore::open(config.data_dir.clone()).await?);
    info!("💾 {}", pointers.stats().await?);

    // Voz y motor de audio
    let songbird = Songbird::serenity();
    let transport = Arc::new(SongbirdTransport::new(songbird.clone(), config.voice_join_timeout));
    let engine = Arc::new(SongbirdEngine::new(songbird.clone(), config.watchdog.progress_interval));
    let health = Arc::new(HealthMonitor::new(transport.clone(), config.health.clone()));

    let registry = Arc::new(GuildRegistry::new(WorkerDeps {
        engine,
        transport: transport.clone(),
        catalog,
        pointers: pointers.clone(),
        health,
        cooldowns: config.cooldowns.clone(),
        alone: config.alone.clone(),
        watchdog_timeout: config.watchdog.timeout,
        queue_capacity: config.admission.queue_capacity,
        default_volume: config.default_volume_percent(),
        idle_retire: config.worker_idle_retire,
    }));
    let admission = Arc::new(AdmissionControl::new(config.admission.clone(), registry.clone()));

    // Solo hacen falta guilds y estados de voz
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let cancel = CancellationToken::new();
    let handler = JukeboxBot::new(
        config.clone(),
        admission,
        registry.clone(),
        pointers,
        cancel.clone(),
    );

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;
    transport.attach_shard_manager(client.shard_manager.clone());

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        cancel.cancel();
        registry.shutdown_all(SHUTDOWN_TIMEOUT).await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

/// Verifica que la biblioteca y el directorio de datos sean utilizables
async fn health_check(catalog: &dyn Catalog, config: &Config) -> Result<()> {
    let tracks = catalog.load(None).await?;
    let playlists = catalog.playlists().await?;

    let scratch = tempfile::NamedTempFile::new_in(&config.data_dir)?;
    drop(scratch);

    println!("OK ({} pistas, {} playlists)", tracks.len(), playlists.len());
    Ok(())
}
