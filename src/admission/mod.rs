//! # Admission Module
//!
//! Every slash command and button press passes three layers before it can
//! touch a guild's playback session:
//!
//! ### [`burst`] - Per-User Burst Filter
//! Collapses duplicate events for the same action inside `MIN_COMMAND_SPACING`
//! and puts a user into a short spam session after too many commands in a
//! window. Drops here are silent except for the first one of a spam session.
//!
//! ### [`breaker`] - Per-Guild Circuit Breaker
//! A sliding window of accepted commands per guild. Crossing the limit opens
//! the breaker for `BREAKER_OPEN_DURATION` times an escalating penalty.
//!
//! ### Serial Queue
//! Admitted commands go onto the guild worker's bounded channel (see
//! [`crate::guild`]). A full queue fails with `Busy` after `COMMAND_QUEUE_TIMEOUT`.
//!
//! Cooldowns ([`cooldown`]) are checked by the worker when the command is
//! dequeued, so they see the real execution order.
//!
//! All state is keyed by guild; one guild's flood never affects another.

pub mod breaker;
pub mod burst;
pub mod command;
pub mod cooldown;

use serenity::model::id::{GuildId, UserId};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    cache::IdleTable,
    config::AdmissionSettings,
    error::{BusyReason, PlaybackError, PlaybackResult},
    guild::GuildRegistry,
};
use breaker::{BreakerRecord, BreakerVerdict};
use burst::{BurstVerdict, GuildBurst};

pub use command::{Command, CommandKind, CommandReply, Outcome};
pub use cooldown::CooldownBook;

/// Aviso único al entrar en una sesión de spam
pub const SPAM_WARNING: &str = "🚫 Vas demasiado rápido, ignoraré tus comandos unos segundos";

/// Resultado de pasar un comando por el control de admisión
#[derive(Debug)]
pub enum Admission {
    /// Descartado antes de llegar a la cola; `warn` indica si hay que avisar al usuario
    Dropped { warn: bool },
    Answered(PlaybackResult<CommandReply>),
}

pub struct AdmissionControl {
    settings: AdmissionSettings,
    bursts: IdleTable<GuildId, GuildBurst>,
    breakers: IdleTable<GuildId, BreakerRecord>,
    registry: Arc<GuildRegistry>,
}

impl AdmissionControl {
    pub fn new(settings: AdmissionSettings, registry: Arc<GuildRegistry>) -> Self {
        Self {
            settings,
            bursts: IdleTable::new(),
            breakers: IdleTable::new(),
            registry,
        }
    }

    pub async fn admit(&self, guild_id: GuildId, user_id: UserId, command: Command) -> Admission {
        let now = Instant::now();
        let kind = command.kind();

        let burst = self
            .bursts
            .with(guild_id, now, |b| b.check(user_id, kind, now, &self.settings));
        match burst {
            BurstVerdict::Pass => {}
            BurstVerdict::Drop => {
                debug!("Comando /{} de {} descartado en guild {}", kind, user_id, guild_id);
                return Admission::Dropped { warn: false };
            }
            BurstVerdict::DropWithWarning => {
                info!("🚫 Usuario {} en sesión de spam en guild {}", user_id, guild_id);
                return Admission::Dropped { warn: true };
            }
        }

        match self.breakers.with(guild_id, now, |b| b.admit(now, &self.settings)) {
            BreakerVerdict::Admit => {}
            BreakerVerdict::Open { remaining } => {
                return Admission::Answered(Err(PlaybackError::Busy {
                    reason: BusyReason::BreakerOpen { remaining },
                }));
            }
            BreakerVerdict::Tripped { open_for, trips } => {
                warn!(
                    "⚡ Breaker abierto en guild {} durante {:?} (disparo {})",
                    guild_id, open_for, trips
                );
                return Admission::Answered(Err(PlaybackError::Busy {
                    reason: BusyReason::BreakerOpen { remaining: open_for },
                }));
            }
        }

        Admission::Answered(
            self.registry
                .submit(guild_id, command, self.settings.queue_timeout)
                .await,
        )
    }

    #[cfg(test)]
    pub fn breaker_open(&self, guild_id: GuildId, now: Instant) -> bool {
        self.breakers
            .peek(&guild_id, |b| b.is_open(now))
            .unwrap_or(false)
    }

    /// Purga el estado de guilds sin actividad reciente
    pub fn evict_idle(&self, now: Instant) -> usize {
        let idle_for = self.settings.idle_eviction;
        let evicted = self.bursts.evict_idle(now, idle_for) + self.breakers.evict_idle(now, idle_for);
        if evicted > 0 {
            info!("🧹 {} registros de admisión inactivos eliminados", evicted);
        }
        evicted
    }

    pub fn tracked_guilds(&self) -> usize {
        self.breakers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::testing::{FakeEngine, FakeTransport, StaticCatalog},
        config::Config,
        guild::WorkerDeps,
        monitoring::HealthMonitor,
        storage::PointerStore,
    };
    use serenity::model::id::ChannelId;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn control() -> (AdmissionControl, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let transport = Arc::new(FakeTransport::new());
        let deps = WorkerDeps {
            engine: Arc::new(FakeEngine::new()),
            transport: transport.clone(),
            catalog: Arc::new(StaticCatalog::new(&["A", "B"])),
            pointers: Arc::new(PointerStore::open(dir.path().to_path_buf()).await.unwrap()),
            health: Arc::new(HealthMonitor::new(transport, config.health.clone())),
            cooldowns: config.cooldowns.clone(),
            alone: config.alone.clone(),
            watchdog_timeout: config.watchdog.timeout,
            queue_capacity: config.admission.queue_capacity,
            default_volume: config.default_volume_percent(),
            idle_retire: config.worker_idle_retire,
        };
        let registry = Arc::new(GuildRegistry::new(deps));
        (AdmissionControl::new(config.admission, registry), dir)
    }

    fn join() -> Command {
        Command::Join {
            channel_id: ChannelId::new(1),
            text_channel_id: ChannelId::new(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_in_one_guild_leaves_others_untouched() {
        let (control, _dir) = control().await;
        let flooded = GuildId::new(1);
        let quiet = GuildId::new(2);

        // Usuarios distintos para esquivar la capa de ráfagas y llegar al breaker
        for user in 1..=7 {
            let _ = control.admit(flooded, UserId::new(user), Command::Queue).await;
        }
        assert!(control.breaker_open(flooded, Instant::now()));

        let blocked = control.admit(flooded, UserId::new(50), Command::Queue).await;
        assert!(matches!(
            blocked,
            Admission::Answered(Err(PlaybackError::Busy {
                reason: BusyReason::BreakerOpen { .. }
            }))
        ));

        assert!(!control.breaker_open(quiet, Instant::now()));
        let reply = control.admit(quiet, UserId::new(1), join()).await;
        assert!(matches!(reply, Admission::Answered(Ok(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spam_session_warns_once() {
        let (control, _dir) = control().await;
        let guild = GuildId::new(3);
        let user = UserId::new(9);
        let kinds = [Command::Queue, Command::NowPlaying, Command::Playlists, Command::Loop];

        let mut warnings = 0;
        for command in kinds {
            if let Admission::Dropped { warn: true } = control.admit(guild, user, command).await {
                warnings += 1;
            }
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        let again = control.admit(guild, user, Command::Shuffle).await;

        assert_eq!(warnings, 1);
        assert!(matches!(again, Admission::Dropped { warn: false }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_guild_state_is_evicted() {
        let (control, _dir) = control().await;
        control.admit(GuildId::new(4), UserId::new(1), Command::Queue).await;
        assert_eq!(control.tracked_guilds(), 1);

        assert_eq!(control.evict_idle(Instant::now()), 0);
        tokio::time::advance(Duration::from_secs(1801)).await;
        assert_eq!(control.evict_idle(Instant::now()), 2);
        assert_eq!(control.tracked_guilds(), 0);
    }
}
