//! # Guild Module
//!
//! One worker task per guild owns that guild's [`PlaybackSession`] outright.
//! Everything that mutates a session (user commands, engine notifications,
//! health reconnects, watchdog checks, voice-state changes) is a [`GuildJob`]
//! on the worker's bounded channel and runs to completion before the next job
//! starts. Commands therefore apply in admission order, and an engine
//! notification can never interleave with a half-applied command.
//!
//! A worker that has no voice connection and no jobs for `WORKER_IDLE_RETIRE`
//! closes its channel and exits. Commands that raced with the exit are answered
//! with `SessionClosed` without running, and [`GuildRegistry::submit`] retries
//! them once on a fresh worker.
//!
//! [`PlaybackSession`]: crate::audio::session::PlaybackSession

mod worker;

use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::sync::{
    mpsc::{self, error::SendTimeoutError},
    oneshot,
};
use tracing::{debug, info, warn};

use crate::{
    admission::{Command, CommandReply},
    audio::{
        engine::{AudioEngine, EngineEvent},
        track::Catalog,
        transport::VoiceTransport,
    },
    config::{AloneSettings, CooldownSettings},
    error::{BusyReason, PlaybackError, PlaybackResult},
    monitoring::HealthMonitor,
    storage::PointerStore,
};

pub use worker::GuildWorker;

/// Trabajo para el worker de un guild
#[derive(Debug)]
pub enum GuildJob {
    Command {
        command: Command,
        reply: oneshot::Sender<PlaybackResult<CommandReply>>,
    },
    Engine(EngineEvent),
    Reconnect {
        reply: Option<oneshot::Sender<PlaybackResult<()>>>,
    },
    WatchdogCheck,
    /// Usuarios humanos que quedan en el canal de voz del bot
    Listeners { count: usize },
    /// El bot fue desconectado de voz desde fuera
    VoiceLost,
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Dependencias compartidas por todos los workers
#[derive(Clone)]
pub struct WorkerDeps {
    pub engine: Arc<dyn AudioEngine>,
    pub transport: Arc<dyn VoiceTransport>,
    pub catalog: Arc<dyn Catalog>,
    pub pointers: Arc<PointerStore>,
    pub health: Arc<HealthMonitor>,
    pub cooldowns: CooldownSettings,
    pub alone: AloneSettings,
    pub watchdog_timeout: Duration,
    pub queue_capacity: usize,
    /// Volumen en porcentaje si el guild nunca usó /volume
    pub default_volume: u8,
    pub idle_retire: Duration,
}

/// Resultado de intentar encolar un comando
enum Enqueued {
    Sent(oneshot::Receiver<PlaybackResult<CommandReply>>),
    /// El worker ya no acepta trabajos; se devuelve el comando intacto
    Closed(Command),
}

/// Extremo de envío hacia el worker de un guild
#[derive(Debug, Clone)]
pub struct GuildHandle {
    guild_id: GuildId,
    jobs: mpsc::Sender<GuildJob>,
}

impl GuildHandle {
    /// Encola un comando y espera su resultado.
    ///
    /// Si la cola sigue llena pasado `timeout`, falla con `Busy`.
    pub async fn submit(&self, command: Command, timeout: Duration) -> PlaybackResult<CommandReply> {
        match self.enqueue(command, timeout).await? {
            Enqueued::Sent(rx) => rx.await.unwrap_or(Err(PlaybackError::SessionClosed)),
            Enqueued::Closed(_) => Err(PlaybackError::SessionClosed),
        }
    }

    async fn enqueue(&self, command: Command, timeout: Duration) -> PlaybackResult<Enqueued> {
        let (reply, rx) = oneshot::channel();
        match self
            .jobs
            .send_timeout(GuildJob::Command { command, reply }, timeout)
            .await
        {
            Ok(()) => Ok(Enqueued::Sent(rx)),
            Err(SendTimeoutError::Timeout(_)) => {
                warn!("⏳ Cola de comandos llena en guild {}", self.guild_id);
                Err(PlaybackError::Busy {
                    reason: BusyReason::QueueFull,
                })
            }
            Err(SendTimeoutError::Closed(GuildJob::Command { command, .. })) => Ok(Enqueued::Closed(command)),
            Err(SendTimeoutError::Closed(_)) => Err(PlaybackError::SessionClosed),
        }
    }

    /// Encola un trabajo interno sin esperar; `false` si la cola está llena o cerrada
    pub fn try_enqueue(&self, job: GuildJob) -> bool {
        self.jobs.try_send(job).is_ok()
    }

    pub async fn request_reconnect(&self) -> PlaybackResult<()> {
        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(GuildJob::Reconnect { reply: Some(reply) })
            .await
            .map_err(|_| PlaybackError::SessionClosed)?;
        rx.await.unwrap_or(Err(PlaybackError::SessionClosed))
    }

    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

/// Registro de workers por guild, creados bajo demanda
pub struct GuildRegistry {
    workers: DashMap<GuildId, GuildHandle>,
    deps: WorkerDeps,
}

impl GuildRegistry {
    pub fn new(deps: WorkerDeps) -> Self {
        Self {
            workers: DashMap::new(),
            deps,
        }
    }

    /// Handle del worker del guild; lo crea si no existe o si terminó
    pub fn handle(&self, guild_id: GuildId) -> GuildHandle {
        let mut entry = self
            .workers
            .entry(guild_id)
            .or_insert_with(|| GuildWorker::spawn(guild_id, self.deps.clone()));
        if entry.is_closed() {
            *entry = GuildWorker::spawn(guild_id, self.deps.clone());
        }
        entry.clone()
    }

    /// Envía un comando al worker del guild.
    ///
    /// Si el worker se retiró sin ejecutarlo, lo reintenta una vez en uno nuevo.
    pub async fn submit(
        &self,
        guild_id: GuildId,
        command: Command,
        timeout: Duration,
    ) -> PlaybackResult<CommandReply> {
        let retry = match self.handle(guild_id).enqueue(command.clone(), timeout).await? {
            Enqueued::Sent(rx) => match rx.await {
                Ok(Err(PlaybackError::SessionClosed)) | Err(_) => command,
                Ok(result) => return result,
            },
            Enqueued::Closed(command) => command,
        };

        debug!("Guild {}: worker retirado, reintentando /{}", guild_id, retry.kind());
        self.handle(guild_id).submit(retry, timeout).await
    }

    pub fn get(&self, guild_id: GuildId) -> Option<GuildHandle> {
        self.workers
            .get(&guild_id)
            .filter(|h| !h.is_closed())
            .map(|h| h.clone())
    }

    /// Quita del registro los workers que ya terminaron
    pub fn prune_retired(&self) -> usize {
        let before = self.workers.len();
        self.workers.retain(|_, handle| !handle.is_closed());
        before.saturating_sub(self.workers.len())
    }

    pub fn live_handles(&self) -> Vec<GuildHandle> {
        self.workers
            .iter()
            .filter(|h| !h.is_closed())
            .map(|h| h.clone())
            .collect()
    }

    /// Detiene todos los workers, saliendo de voz en cada guild
    pub async fn shutdown_all(&self, timeout: Duration) {
        let handles = self.live_handles();
        info!("🛑 Cerrando {} sesiones de guild", handles.len());

        let waits = handles.into_iter().map(|handle| async move {
            let (done, rx) = oneshot::channel();
            if handle
                .jobs
                .send_timeout(GuildJob::Shutdown { done }, timeout)
                .await
                .is_err()
            {
                warn!("No se pudo cerrar la sesión de guild {}", handle.guild_id);
                return;
            }
            if tokio::time::timeout(timeout, rx).await.is_err() {
                warn!("La sesión de guild {} no respondió al cierre", handle.guild_id);
            }
        });
        futures::future::join_all(waits).await;

        self.workers.clear();
        self.deps.health.shutdown();
    }
}
