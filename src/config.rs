use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::admission::CommandKind;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Paths
    pub data_dir: PathBuf,
    pub music_dir: PathBuf,

    // Audio
    pub default_volume: f32,
    pub voice_join_timeout: Duration,

    /// Un worker sin voz ni trabajos durante este tiempo se libera
    pub worker_idle_retire: Duration,

    pub admission: AdmissionSettings,
    pub cooldowns: CooldownSettings,
    pub health: HealthSettings,
    pub watchdog: WatchdogSettings,
    pub alone: AloneSettings,
}

/// Capas de control de admisión: ráfagas, breaker y cola serial
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdmissionSettings {
    pub min_spacing: Duration,
    pub spam_trigger_count: usize,
    pub spam_trigger_window: Duration,
    pub spam_session_duration: Duration,
    pub breaker_window: Duration,
    pub breaker_max_commands: usize,
    pub breaker_open_duration: Duration,
    pub breaker_penalty_reset: Duration,
    pub queue_capacity: usize,
    pub queue_timeout: Duration,
    pub idle_eviction: Duration,
    pub maintenance_interval: Duration,
}

/// Enfriamiento por tipo de comando
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CooldownSettings {
    pub join: Duration,
    pub leave: Duration,
    pub play: Duration,
    pub pause: Duration,
    pub volume: Duration,
    pub skip: Duration,
    pub previous: Duration,
    pub stop: Duration,
    pub shuffle: Duration,
    pub loop_track: Duration,
    pub queue: Duration,
    pub now_playing: Duration,
    pub playlists: Duration,
}

impl CooldownSettings {
    pub fn for_kind(&self, kind: CommandKind) -> Duration {
        match kind {
            CommandKind::Join => self.join,
            CommandKind::Leave => self.leave,
            CommandKind::Play => self.play,
            CommandKind::Pause => self.pause,
            CommandKind::Volume => self.volume,
            CommandKind::Skip => self.skip,
            CommandKind::Previous => self.previous,
            CommandKind::Stop => self.stop,
            CommandKind::Shuffle => self.shuffle,
            CommandKind::Loop => self.loop_track,
            CommandKind::Queue => self.queue,
            CommandKind::NowPlaying => self.now_playing,
            CommandKind::Playlists => self.playlists,
        }
    }
}

/// Umbrales del monitor de salud de la conexión de voz
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthSettings {
    pub bad_latency: Duration,
    pub marginal_latency: Duration,
    pub bad_limit: u32,
    pub recovery_window: u32,
    pub reconnect_cooldown: Duration,
    pub max_reconnect_attempts: u32,
    pub interval_normal: Duration,
    pub interval_suspicious: Duration,
    pub interval_post_reconnect: Duration,
    pub interval_recovering: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchdogSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub progress_interval: Duration,
}

/// Qué hacer cuando el bot se queda solo en el canal de voz
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AloneSettings {
    pub pause_after: Duration,
    pub leave_after: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)?;

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Construye la configuración a partir de una fuente de variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup: &lookup };
        let defaults = Self::default();

        Ok(Self {
            // Discord
            discord_token: env.raw("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            application_id: env
                .raw("APPLICATION_ID")
                .context("APPLICATION_ID no está definido")?
                .parse()
                .context("APPLICATION_ID inválido")?,
            guild_id: env.raw("GUILD_ID").and_then(|s| s.parse().ok()),

            // Paths
            data_dir: env.parse("DATA_DIR", defaults.data_dir)?,
            music_dir: env.parse("MUSIC_DIR", defaults.music_dir)?,

            // Audio
            default_volume: env.parse("DEFAULT_VOLUME", defaults.default_volume)?,
            voice_join_timeout: env.duration("VOICE_JOIN_TIMEOUT", defaults.voice_join_timeout)?,

            worker_idle_retire: env.duration("WORKER_IDLE_RETIRE", defaults.worker_idle_retire)?,

            admission: AdmissionSettings {
                min_spacing: env.duration("MIN_COMMAND_SPACING", defaults.admission.min_spacing)?,
                spam_trigger_count: env
                    .parse("SPAM_TRIGGER_COUNT", defaults.admission.spam_trigger_count)?,
                spam_trigger_window: env
                    .duration("SPAM_TRIGGER_WINDOW", defaults.admission.spam_trigger_window)?,
                spam_session_duration: env
                    .duration("SPAM_SESSION_DURATION", defaults.admission.spam_session_duration)?,
                breaker_window: env.duration("BREAKER_WINDOW", defaults.admission.breaker_window)?,
                breaker_max_commands: env
                    .parse("BREAKER_MAX_COMMANDS", defaults.admission.breaker_max_commands)?,
                breaker_open_duration: env
                    .duration("BREAKER_OPEN_DURATION", defaults.admission.breaker_open_duration)?,
                breaker_penalty_reset: env
                    .duration("BREAKER_PENALTY_RESET", defaults.admission.breaker_penalty_reset)?,
                queue_capacity: env.parse("COMMAND_QUEUE_CAPACITY", defaults.admission.queue_capacity)?,
                queue_timeout: env.duration("COMMAND_QUEUE_TIMEOUT", defaults.admission.queue_timeout)?,
                idle_eviction: env
                    .duration("ADMISSION_IDLE_EVICTION", defaults.admission.idle_eviction)?,
                maintenance_interval: env
                    .duration("MAINTENANCE_INTERVAL", defaults.admission.maintenance_interval)?,
            },

            cooldowns: CooldownSettings {
                join: env.duration("COOLDOWN_JOIN", defaults.cooldowns.join)?,
                leave: env.duration("COOLDOWN_LEAVE", defaults.cooldowns.leave)?,
                play: env.duration("COOLDOWN_PLAY", defaults.cooldowns.play)?,
                pause: env.duration("COOLDOWN_PAUSE", defaults.cooldowns.pause)?,
                volume: env.duration("COOLDOWN_VOLUME", defaults.cooldowns.volume)?,
                skip: env.duration("COOLDOWN_SKIP", defaults.cooldowns.skip)?,
                previous: env.duration("COOLDOWN_PREVIOUS", defaults.cooldowns.previous)?,
                stop: env.duration("COOLDOWN_STOP", defaults.cooldowns.stop)?,
                shuffle: env.duration("COOLDOWN_SHUFFLE", defaults.cooldowns.shuffle)?,
                loop_track: env.duration("COOLDOWN_LOOP", defaults.cooldowns.loop_track)?,
                queue: env.duration("COOLDOWN_QUEUE", defaults.cooldowns.queue)?,
                now_playing: env.duration("COOLDOWN_NOWPLAYING", defaults.cooldowns.now_playing)?,
                playlists: env.duration("COOLDOWN_PLAYLISTS", defaults.cooldowns.playlists)?,
            },

            health: HealthSettings {
                bad_latency: env.duration("HEALTH_BAD_LATENCY", defaults.health.bad_latency)?,
                marginal_latency: env
                    .duration("HEALTH_MARGINAL_LATENCY", defaults.health.marginal_latency)?,
                bad_limit: env.parse("HEALTH_BAD_LIMIT", defaults.health.bad_limit)?,
                recovery_window: env.parse("HEALTH_RECOVERY_WINDOW", defaults.health.recovery_window)?,
                reconnect_cooldown: env
                    .duration("HEALTH_RECONNECT_COOLDOWN", defaults.health.reconnect_cooldown)?,
                max_reconnect_attempts: env.parse(
                    "HEALTH_MAX_RECONNECT_ATTEMPTS",
                    defaults.health.max_reconnect_attempts,
                )?,
                interval_normal: env
                    .duration("HEALTH_INTERVAL_NORMAL", defaults.health.interval_normal)?,
                interval_suspicious: env
                    .duration("HEALTH_INTERVAL_SUSPICIOUS", defaults.health.interval_suspicious)?,
                interval_post_reconnect: env.duration(
                    "HEALTH_INTERVAL_POST_RECONNECT",
                    defaults.health.interval_post_reconnect,
                )?,
                interval_recovering: env
                    .duration("HEALTH_INTERVAL_RECOVERING", defaults.health.interval_recovering)?,
            },

            watchdog: WatchdogSettings {
                interval: env.duration("WATCHDOG_INTERVAL", defaults.watchdog.interval)?,
                timeout: env.duration("WATCHDOG_TIMEOUT", defaults.watchdog.timeout)?,
                progress_interval: env
                    .duration("PROGRESS_INTERVAL", defaults.watchdog.progress_interval)?,
            },

            alone: AloneSettings {
                pause_after: env.duration("ALONE_PAUSE_DELAY", defaults.alone.pause_after)?,
                leave_after: env.duration("ALONE_DISCONNECT_DELAY", defaults.alone.leave_after)?,
            },
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - Queue capacity, spam and breaker thresholds must be greater than 0
    /// - The marginal latency tier must sit below the bad tier
    /// - Progress must be reported more often than the watchdog timeout
    /// - Auto-pause when alone must come before auto-disconnect
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.default_volume < 0.0 || self.default_volume > 2.0 {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        let admission = &self.admission;
        if admission.queue_capacity == 0 {
            anyhow::bail!("Command queue capacity must be greater than 0");
        }
        if admission.spam_trigger_count < 2 {
            anyhow::bail!(
                "Spam trigger count must be at least 2, got: {}",
                admission.spam_trigger_count
            );
        }
        if admission.breaker_max_commands == 0 || admission.breaker_window.is_zero() {
            anyhow::bail!("Circuit breaker window and threshold must be greater than 0");
        }

        let health = &self.health;
        if health.marginal_latency >= health.bad_latency {
            anyhow::bail!(
                "Marginal latency ({:?}) must be lower than bad latency ({:?})",
                health.marginal_latency,
                health.bad_latency
            );
        }
        if health.bad_limit == 0 || health.recovery_window == 0 {
            anyhow::bail!("Health bad limit and recovery window must be greater than 0");
        }

        if self.watchdog.progress_interval >= self.watchdog.timeout {
            anyhow::bail!(
                "Progress interval ({:?}) must be shorter than the watchdog timeout ({:?})",
                self.watchdog.progress_interval,
                self.watchdog.timeout
            );
        }

        if self.alone.pause_after >= self.alone.leave_after {
            anyhow::bail!(
                "Alone pause delay ({:?}) must be shorter than the disconnect delay ({:?})",
                self.alone.pause_after,
                self.alone.leave_after
            );
        }

        Ok(())
    }

    /// Volumen por defecto en porcentaje (0.5 → 50)
    pub fn default_volume_percent(&self) -> u8 {
        (self.default_volume * 100.0).round().clamp(0.0, 200.0) as u8
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Never includes the Discord token.
    pub fn summary(&self) -> String {
        let d = humantime::format_duration;
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Paths: data={} music={}\n  \
            Audio: {}% vol, join timeout {}\n  \
            Admission: {} queued/{}, breaker {} cmds/{}, spam {} cmds/{}\n  \
            Health: bad>{} marginal>{}, {} bad samples, reconnect cooldown {}\n  \
            Watchdog: every {}, hang after {}\n  \
            Alone: pause after {}, leave after {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.data_dir.display(),
            self.music_dir.display(),
            (self.default_volume * 100.0) as u32,
            d(self.voice_join_timeout),
            self.admission.queue_capacity,
            d(self.admission.queue_timeout),
            self.admission.breaker_max_commands,
            d(self.admission.breaker_window),
            self.admission.spam_trigger_count,
            d(self.admission.spam_trigger_window),
            d(self.health.bad_latency),
            d(self.health.marginal_latency),
            self.health.bad_limit,
            d(self.health.reconnect_cooldown),
            d(self.watchdog.interval),
            d(self.watchdog.timeout),
            d(self.alone.pause_after),
            d(self.alone.leave_after),
        )
    }
}

/// Lector de variables con valores por defecto
struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.raw(key) {
            Some(value) => value
                .trim()
                .parse()
                .with_context(|| format!("{} tiene un valor inválido: {}", key, value)),
            None => Ok(default),
        }
    }

    /// Duraciones legibles: "90s", "1m 30s", "250ms"
    fn duration(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.raw(key) {
            Some(value) => humantime::parse_duration(value.trim())
                .with_context(|| format!("{} no es una duración válida: {}", key, value)),
            None => Ok(default),
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            data_dir: "/app/data".into(),
            music_dir: "/app/music".into(),

            default_volume: 0.5,
            voice_join_timeout: Duration::from_secs(10),

            worker_idle_retire: Duration::from_secs(1_800),

            admission: AdmissionSettings {
                min_spacing: Duration::from_secs(1),
                spam_trigger_count: 3,
                spam_trigger_window: Duration::from_millis(1_500),
                spam_session_duration: Duration::from_secs(5),
                breaker_window: Duration::from_secs(2),
                breaker_max_commands: 6,
                breaker_open_duration: Duration::from_secs(30),
                breaker_penalty_reset: Duration::from_secs(300),
                queue_capacity: 30,
                queue_timeout: Duration::from_secs(1),
                idle_eviction: Duration::from_secs(1_800),
                maintenance_interval: Duration::from_secs(3_600),
            },

            cooldowns: CooldownSettings {
                join: Duration::from_secs(3),
                leave: Duration::from_secs(3),
                play: Duration::from_secs(1),
                pause: Duration::from_millis(500),
                volume: Duration::from_secs(1),
                skip: Duration::from_secs(1),
                previous: Duration::from_millis(1_500),
                stop: Duration::from_secs(2),
                shuffle: Duration::from_secs(2),
                loop_track: Duration::from_secs(1),
                queue: Duration::from_secs(1),
                now_playing: Duration::from_secs(1),
                playlists: Duration::from_secs(1),
            },

            health: HealthSettings {
                bad_latency: Duration::from_millis(250),
                marginal_latency: Duration::from_millis(150),
                bad_limit: 3,
                recovery_window: 3,
                reconnect_cooldown: Duration::from_secs(30),
                max_reconnect_attempts: 3,
                interval_normal: Duration::from_secs(35),
                interval_suspicious: Duration::from_secs(10),
                interval_post_reconnect: Duration::from_secs(8),
                interval_recovering: Duration::from_secs(20),
            },

            watchdog: WatchdogSettings {
                interval: Duration::from_secs(30),
                timeout: Duration::from_secs(90),
                progress_interval: Duration::from_secs(5),
            },

            alone: AloneSettings {
                pause_after: Duration::from_secs(10),
                leave_after: Duration::from_secs(600),
            },
        }
    }
}
