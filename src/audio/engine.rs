use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::GuildId;
use songbird::{
    input::{File, Input},
    tracks::{ControlError, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    audio::{session::SessionToken, track::Track, transport::VoiceHandle},
    error::{PlaybackError, PlaybackResult},
    guild::GuildJob,
};

/// Notificaciones que el motor de audio entrega fuera del flujo normal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// La pista iniciada con `token` terminó (de forma natural, por error o porque se detuvo)
    Finished { token: SessionToken },
    /// La pista iniciada con `token` sigue avanzando
    Progress { token: SessionToken },
}

/// Canal de entrega hacia el worker del guild.
///
/// Los handlers del motor solo envían trabajos por aquí; nunca tocan el estado
/// de la sesión directamente.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    guild_id: GuildId,
    jobs: mpsc::Sender<GuildJob>,
}

impl CompletionSender {
    pub fn new(guild_id: GuildId, jobs: mpsc::Sender<GuildJob>) -> Self {
        Self { guild_id, jobs }
    }

    pub async fn finished(&self, token: SessionToken) {
        if self
            .jobs
            .send(GuildJob::Engine(EngineEvent::Finished { token }))
            .await
            .is_err()
        {
            debug!("Sesión de guild {} cerrada, se descarta fin de pista {}", self.guild_id, token);
        }
    }

    /// El progreso es un latido: si la cola está llena se descarta
    pub fn progress(&self, token: SessionToken) {
        if self
            .jobs
            .try_send(GuildJob::Engine(EngineEvent::Progress { token }))
            .is_err()
        {
            debug!("Latido de progreso descartado en guild {}", self.guild_id);
        }
    }
}

/// Puente hacia el motor externo de decodificación y reproducción
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Inicia `track` con ganancia `volume`; toda notificación posterior va etiquetada con `token`
    async fn start(
        &self,
        voice: &VoiceHandle,
        track: &Track,
        volume: f32,
        token: SessionToken,
        completions: CompletionSender,
    ) -> PlaybackResult<()>;

    async fn stop(&self, voice: &VoiceHandle);

    async fn pause(&self, voice: &VoiceHandle) -> PlaybackResult<()>;

    async fn resume(&self, voice: &VoiceHandle) -> PlaybackResult<()>;

    /// Cambia la ganancia de la pista en curso
    async fn set_volume(&self, voice: &VoiceHandle, volume: f32) -> PlaybackResult<()>;
}

/// Motor basado en el driver de Songbird
pub struct SongbirdEngine {
    manager: Arc<Songbird>,
    progress_interval: Duration,
    /// Pista en curso por guild, para pausar y cambiar volumen
    tracks: DashMap<GuildId, TrackHandle>,
}

impl SongbirdEngine {
    pub fn new(manager: Arc<Songbird>, progress_interval: Duration) -> Self {
        Self {
            manager,
            progress_interval,
            tracks: DashMap::new(),
        }
    }

    fn control(
        &self,
        voice: &VoiceHandle,
        f: impl FnOnce(&TrackHandle) -> Result<(), ControlError>,
    ) -> PlaybackResult<()> {
        let handle = self
            .tracks
            .get(&voice.guild_id)
            .ok_or(PlaybackError::NothingPlaying)?;
        f(handle.value()).map_err(|e| PlaybackError::Control { reason: e.to_string() })
    }
}

#[async_trait]
impl AudioEngine for SongbirdEngine {
    async fn start(
        &self,
        voice: &VoiceHandle,
        track: &Track,
        volume: f32,
        token: SessionToken,
        completions: CompletionSender,
    ) -> PlaybackResult<()> {
        let failed = |reason: String| PlaybackError::PlaybackFailed {
            title: track.title().to_string(),
            reason,
        };

        if !tokio::fs::try_exists(track.path()).await.unwrap_or(false) {
            return Err(failed("el archivo no existe".to_string()));
        }

        let call = self
            .manager
            .get(voice.guild_id)
            .ok_or_else(|| failed("no hay llamada de voz activa".to_string()))?;

        let input: Input = File::new(track.path().to_path_buf()).into();
        let handle = {
            let mut call = call.lock().await;
            call.play_input(input)
        };

        if let Err(e) = handle.set_volume(volume) {
            warn!("No se pudo fijar el volumen en guild {}: {:?}", voice.guild_id, e);
        }

        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackEndNotifier {
                        token,
                        completions: completions.clone(),
                    },
                )
                .map_err(|e| failed(e.to_string()))?;
        }

        handle
            .add_event(
                Event::Periodic(self.progress_interval, None),
                ProgressNotifier { token, completions },
            )
            .map_err(|e| failed(e.to_string()))?;

        self.tracks.insert(voice.guild_id, handle);
        info!("🎵 Reproduciendo {} en guild {} (sesión {})", track.title(), voice.guild_id, token);
        Ok(())
    }

    async fn stop(&self, voice: &VoiceHandle) {
        self.tracks.remove(&voice.guild_id);
        if let Some(call) = self.manager.get(voice.guild_id) {
            call.lock().await.stop();
        }
    }

    async fn pause(&self, voice: &VoiceHandle) -> PlaybackResult<()> {
        self.control(voice, TrackHandle::pause)
    }

    async fn resume(&self, voice: &VoiceHandle) -> PlaybackResult<()> {
        self.control(voice, TrackHandle::play)
    }

    async fn set_volume(&self, voice: &VoiceHandle, volume: f32) -> PlaybackResult<()> {
        self.control(voice, |handle| handle.set_volume(volume))
    }
}

/// Handler para cuando termina (o falla) una pista
struct TrackEndNotifier {
    token: SessionToken,
    completions: CompletionSender,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                if let songbird::tracks::PlayMode::Errored(e) = &state.playing {
                    warn!("❌ Error del motor en pista {}: {:?}", self.token, e);
                }
            }
        }

        self.completions.finished(self.token).await;
        Some(Event::Cancel)
    }
}

/// Handler periódico que alimenta al watchdog
struct ProgressNotifier {
    token: SessionToken,
    completions: CompletionSender,
}

#[async_trait]
impl VoiceEventHandler for ProgressNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.completions.progress(self.token);
        None
    }
}
