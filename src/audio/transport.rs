use async_trait::async_trait;
use serenity::all::{ChannelId, GuildId, ShardId, ShardManager};
use songbird::Songbird;
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::error::{PlaybackError, PlaybackResult};

/// Referencia opaca a la conexión de voz de un guild.
///
/// Solo identifica la llamada; la llamada real vive en el manager de Songbird.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceHandle {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

/// Transporte de voz: unirse, salir y medir latencia
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> PlaybackResult<VoiceHandle>;

    async fn leave(&self, voice: &VoiceHandle) -> PlaybackResult<()>;

    /// `None` cuando la latencia todavía no se conoce (conexión recién creada)
    async fn sample_latency(&self, voice: &VoiceHandle) -> Option<Duration>;

    async fn is_connected(&self, voice: &VoiceHandle) -> bool;
}

/// Transporte respaldado por el manager de Songbird
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    shard_manager: OnceLock<Arc<ShardManager>>,
    join_timeout: Duration,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, join_timeout: Duration) -> Self {
        Self {
            manager,
            shard_manager: OnceLock::new(),
            join_timeout,
        }
    }

    /// El shard manager solo existe una vez construido el cliente
    pub fn attach_shard_manager(&self, shard_manager: Arc<ShardManager>) {
        if self.shard_manager.set(shard_manager).is_err() {
            warn!("Shard manager ya estaba registrado en el transporte de voz");
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> PlaybackResult<VoiceHandle> {
        let joined = tokio::time::timeout(self.join_timeout, self.manager.join(guild_id, channel_id))
            .await
            .map_err(|_| PlaybackError::VoiceUnavailable {
                reason: format!("sin respuesta en {}", humantime::format_duration(self.join_timeout)),
            })?;

        let call = joined.map_err(|e| PlaybackError::VoiceUnavailable {
            reason: e.to_string(),
        })?;

        // El bot no necesita escuchar a nadie
        if let Err(e) = call.lock().await.deafen(true).await {
            warn!("No se pudo ensordecer al bot en guild {}: {:?}", guild_id, e);
        }

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
        Ok(VoiceHandle { guild_id, channel_id })
    }

    async fn leave(&self, voice: &VoiceHandle) -> PlaybackResult<()> {
        match self.manager.remove(voice.guild_id).await {
            Ok(()) => {
                info!("👋 Desconectado del canal de voz en guild {}", voice.guild_id);
                Ok(())
            }
            Err(songbird::error::JoinError::NoCall) => Ok(()),
            Err(e) => Err(PlaybackError::VoiceUnavailable {
                reason: e.to_string(),
            }),
        }
    }

    async fn sample_latency(&self, voice: &VoiceHandle) -> Option<Duration> {
        if !self.is_connected(voice).await {
            return None;
        }

        // Songbird no expone el RTT de voz; se usa el heartbeat del shard del guild
        let shard_manager = self.shard_manager.get()?;
        let runners = shard_manager.runners.lock().await;
        let total = runners.len().max(1) as u64;
        let shard = ShardId(((voice.guild_id.get() >> 22) % total) as u32);

        let latency = runners.get(&shard).and_then(|runner| runner.latency);
        debug!("📡 Latencia de guild {}: {:?}", voice.guild_id, latency);
        latency
    }

    async fn is_connected(&self, voice: &VoiceHandle) -> bool {
        match self.manager.get(voice.guild_id) {
            Some(call) => call.lock().await.current_connection().is_some(),
            None => false,
        }
    }
}
