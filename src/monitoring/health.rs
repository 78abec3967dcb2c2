use dashmap::DashMap;
use parking_lot::RwLock;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::transport::{VoiceHandle, VoiceTransport},
    config::HealthSettings,
    error::PlaybackError,
    guild::GuildJob,
};

/// Estados del monitor mientras hay conexión de voz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Normal,
    Suspicious,
    PostReconnect,
    Recovering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleQuality {
    /// Sin dato todavía (conexión recién creada); no cuenta
    Unknown,
    Good,
    Marginal,
    Bad,
}

pub fn classify(sample: Option<Duration>, settings: &HealthSettings) -> SampleQuality {
    match sample {
        None => SampleQuality::Unknown,
        Some(latency) if latency > settings.bad_latency => SampleQuality::Bad,
        Some(latency) if latency > settings.marginal_latency => SampleQuality::Marginal,
        Some(_) => SampleQuality::Good,
    }
}

/// Acción que el monitor pide tras una muestra
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    None,
    Reconnect,
    Degraded { attempts: u32 },
}

/// Máquina de estados de salud de una conexión
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    state: HealthState,
    last_latency_sample_ms: Option<u64>,
    consecutive_bad_samples: u32,
    last_reconnect_at: Option<Instant>,
    /// Valor previo de `last_reconnect_at`, para deshacer una reconexión no entregada
    previous_reconnect_at: Option<Instant>,
    recovery_samples: u32,
    reconnect_streak: u32,
    degraded_reported: bool,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            state: HealthState::Normal,
            last_latency_sample_ms: None,
            consecutive_bad_samples: 0,
            last_reconnect_at: None,
            previous_reconnect_at: None,
            recovery_samples: 0,
            reconnect_streak: 0,
            degraded_reported: false,
        }
    }

    pub fn observe(&mut self, sample: Option<Duration>, now: Instant, settings: &HealthSettings) -> HealthAction {
        let quality = classify(sample, settings);
        if quality == SampleQuality::Unknown {
            return HealthAction::None;
        }
        self.last_latency_sample_ms = sample.map(|s| s.as_millis() as u64);

        match self.state {
            HealthState::Normal => match quality {
                SampleQuality::Bad => {
                    self.state = HealthState::Suspicious;
                    self.consecutive_bad_samples = 1;
                }
                SampleQuality::Marginal => {
                    self.state = HealthState::Suspicious;
                    self.consecutive_bad_samples = 0;
                }
                _ => {
                    self.reconnect_streak = 0;
                    self.degraded_reported = false;
                }
            },
            HealthState::Suspicious => match quality {
                SampleQuality::Bad => {
                    self.consecutive_bad_samples += 1;
                    if self.consecutive_bad_samples >= settings.bad_limit {
                        return self.try_reconnect(now, settings);
                    }
                }
                SampleQuality::Good => {
                    self.state = HealthState::Normal;
                    self.consecutive_bad_samples = 0;
                }
                _ => {}
            },
            HealthState::PostReconnect => {
                self.state = HealthState::Recovering;
                self.recovery_samples = 1;
            }
            HealthState::Recovering => {
                self.recovery_samples += 1;
                if self.recovery_samples >= settings.recovery_window {
                    self.state = HealthState::Normal;
                    self.consecutive_bad_samples = 0;
                    self.recovery_samples = 0;
                }
            }
        }

        HealthAction::None
    }

    fn try_reconnect(&mut self, now: Instant, settings: &HealthSettings) -> HealthAction {
        let cooling = self
            .last_reconnect_at
            .is_some_and(|last| now.saturating_duration_since(last) < settings.reconnect_cooldown);
        if cooling {
            return HealthAction::None;
        }

        if self.reconnect_streak >= settings.max_reconnect_attempts {
            if self.degraded_reported {
                return HealthAction::None;
            }
            self.degraded_reported = true;
            return HealthAction::Degraded {
                attempts: self.reconnect_streak,
            };
        }

        self.reconnect_streak += 1;
        self.previous_reconnect_at = self.last_reconnect_at.replace(now);
        self.consecutive_bad_samples = 0;
        self.state = HealthState::PostReconnect;
        HealthAction::Reconnect
    }

    /// La reconexión pedida no llegó al worker: no consume intento ni enfriamiento.
    ///
    /// Vuelve a `Suspicious` con la racha completa, así la próxima muestra mala la pide otra vez.
    pub fn reconnect_not_sent(&mut self, settings: &HealthSettings) {
        if self.state != HealthState::PostReconnect {
            return;
        }
        self.state = HealthState::Suspicious;
        self.consecutive_bad_samples = settings.bad_limit.saturating_sub(1);
        self.reconnect_streak = self.reconnect_streak.saturating_sub(1);
        self.last_reconnect_at = self.previous_reconnect_at.take();
    }

    /// Intervalo de muestreo adaptado al estado
    pub fn next_interval(&self, settings: &HealthSettings) -> Duration {
        match self.state {
            HealthState::Normal => settings.interval_normal,
            HealthState::Suspicious => settings.interval_suspicious,
            HealthState::PostReconnect => settings.interval_post_reconnect,
            HealthState::Recovering => settings.interval_recovering,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn last_latency_ms(&self) -> Option<u64> {
        self.last_latency_sample_ms
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

struct TrackedConnection {
    cancel: CancellationToken,
    health: Arc<RwLock<ConnectionHealth>>,
}

/// Monitor de salud: una tarea de muestreo por guild conectado
pub struct HealthMonitor {
    transport: Arc<dyn VoiceTransport>,
    settings: HealthSettings,
    connections: DashMap<GuildId, TrackedConnection>,
}

impl HealthMonitor {
    pub fn new(transport: Arc<dyn VoiceTransport>, settings: HealthSettings) -> Self {
        Self {
            transport,
            settings,
            connections: DashMap::new(),
        }
    }

    /// Empieza a muestrear `voice`; las reconexiones se piden como trabajos al worker
    pub fn track(&self, voice: VoiceHandle, jobs: mpsc::WeakSender<GuildJob>) {
        self.untrack(voice.guild_id);

        let cancel = CancellationToken::new();
        let health = Arc::new(RwLock::new(ConnectionHealth::new()));
        self.connections.insert(
            voice.guild_id,
            TrackedConnection {
                cancel: cancel.clone(),
                health: health.clone(),
            },
        );

        let transport = self.transport.clone();
        let settings = self.settings.clone();
        tokio::spawn(async move {
            debug!("📡 Monitor de salud iniciado para guild {}", voice.guild_id);
            loop {
                let interval = health.read().next_interval(&settings);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let sample = transport.sample_latency(&voice).await;
                let (action, state, latency_ms) = {
                    let mut health = health.write();
                    let action = health.observe(sample, Instant::now(), &settings);
                    (action, health.state(), health.last_latency_ms())
                };
                debug!(
                    "📡 Guild {}: {:?}, latencia {:?} ms",
                    voice.guild_id, state, latency_ms
                );

                match action {
                    HealthAction::None => {}
                    HealthAction::Reconnect => {
                        warn!(
                            "📡 Latencia degradada en guild {} ({:?}), forzando reconexión",
                            voice.guild_id, sample
                        );
                        let Some(jobs) = jobs.upgrade() else { break };
                        if jobs.try_send(GuildJob::Reconnect { reply: None }).is_err() {
                            health.write().reconnect_not_sent(&settings);
                            warn!(
                                "No se pudo encolar la reconexión para guild {}, se reintentará",
                                voice.guild_id
                            );
                        }
                    }
                    HealthAction::Degraded { attempts } => {
                        error!(
                            "❌ Guild {}: {}",
                            voice.guild_id,
                            PlaybackError::ConnectionDegraded { attempts }
                        );
                    }
                }
            }
            debug!("📡 Monitor de salud detenido para guild {}", voice.guild_id);
        });

        info!("📡 Monitoreando conexión de voz en guild {}", voice.guild_id);
    }

    pub fn untrack(&self, guild_id: GuildId) {
        if let Some((_, connection)) = self.connections.remove(&guild_id) {
            connection.cancel.cancel();
        }
    }

    #[cfg(test)]
    pub fn state_of(&self, guild_id: GuildId) -> Option<HealthState> {
        self.connections
            .get(&guild_id)
            .map(|c| c.health.read().state())
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.connections.len()
    }

    pub fn shutdown(&self) {
        for connection in self.connections.iter() {
            connection.cancel.cancel();
        }
        self.connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::testing::FakeTransport, config::Config};
    use pretty_assertions::assert_eq;
    use serenity::model::id::ChannelId;

    const BAD: Option<Duration> = Some(Duration::from_millis(400));
    const MARGINAL: Option<Duration> = Some(Duration::from_millis(200));
    const GOOD: Option<Duration> = Some(Duration::from_millis(40));

    fn settings() -> HealthSettings {
        Config::default().health
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_is_deterministic() {
        let settings = settings();
        let mut health = ConnectionHealth::new();

        let mut states = Vec::new();
        let mut actions = Vec::new();
        for sample in [BAD, BAD, BAD, GOOD, GOOD, GOOD] {
            actions.push(health.observe(sample, Instant::now(), &settings));
            states.push(health.state());
        }

        assert_eq!(
            states,
            vec![
                HealthState::Suspicious,
                HealthState::Suspicious,
                HealthState::PostReconnect,
                HealthState::Recovering,
                HealthState::Recovering,
                HealthState::Normal,
            ]
        );
        assert_eq!(
            actions.iter().filter(|a| **a == HealthAction::Reconnect).count(),
            1
        );
        assert_eq!(actions[2], HealthAction::Reconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_bad_latency_respects_cooldown() {
        let settings = HealthSettings {
            max_reconnect_attempts: 1_000,
            ..settings()
        };
        let mut health = ConnectionHealth::new();
        let start = Instant::now();
        let mut reconnects = Vec::new();

        for _ in 0..100 {
            if health.observe(BAD, Instant::now(), &settings) == HealthAction::Reconnect {
                reconnects.push(Instant::now());
            }
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        assert!(!reconnects.is_empty());
        for pair in reconnects.windows(2) {
            assert!(pair[1] - pair[0] >= settings.reconnect_cooldown);
        }
        let elapsed = Instant::now() - start;
        let allowed = (elapsed.as_secs() / settings.reconnect_cooldown.as_secs()) as usize + 1;
        assert!(reconnects.len() <= allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_samples_are_ignored_and_marginal_is_suspicious() {
        let settings = settings();
        let mut health = ConnectionHealth::new();

        for _ in 0..10 {
            assert_eq!(health.observe(None, Instant::now(), &settings), HealthAction::None);
        }
        assert_eq!(health.state(), HealthState::Normal);
        assert_eq!(health.last_latency_ms(), None);

        health.observe(MARGINAL, Instant::now(), &settings);
        assert_eq!(health.state(), HealthState::Suspicious);
        assert_eq!(health.next_interval(&settings), settings.interval_suspicious);

        health.observe(GOOD, Instant::now(), &settings);
        assert_eq!(health.state(), HealthState::Normal);
        assert_eq!(health.last_latency_ms(), Some(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reconnects_report_degraded_once() {
        let settings = settings();
        let mut health = ConnectionHealth::new();
        let mut actions = Vec::new();

        for _ in 0..200 {
            let action = health.observe(BAD, Instant::now(), &settings);
            if action != HealthAction::None {
                actions.push(action);
            }
            tokio::time::advance(Duration::from_secs(5)).await;
        }

        let attempts = settings.max_reconnect_attempts;
        let mut expected = vec![HealthAction::Reconnect; attempts as usize];
        expected.push(HealthAction::Degraded { attempts });
        assert_eq!(actions, expected);

        // Una conexión sana vuelve a habilitar las reconexiones
        health.observe(GOOD, Instant::now(), &settings);
        health.observe(GOOD, Instant::now(), &settings);
        assert_eq!(health.state(), HealthState::Normal);
        for _ in 0..settings.bad_limit {
            health.observe(BAD, Instant::now(), &settings);
        }
        assert_eq!(health.state(), HealthState::PostReconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undelivered_reconnect_keeps_attempt_and_cooldown() {
        let settings = settings();
        let mut health = ConnectionHealth::new();

        for _ in 0..settings.bad_limit {
            health.observe(BAD, Instant::now(), &settings);
        }
        assert_eq!(health.state(), HealthState::PostReconnect);
        health.reconnect_not_sent(&settings);
        assert_eq!(health.state(), HealthState::Suspicious);

        // Sin enfriamiento pendiente: la siguiente muestra mala vuelve a pedirla
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(health.observe(BAD, Instant::now(), &settings), HealthAction::Reconnect);

        // Los intentos no entregados no cuentan para el límite
        let mut reconnects = 1;
        for _ in 0..50 {
            tokio::time::advance(settings.reconnect_cooldown).await;
            health.reconnect_not_sent(&settings);
            if health.observe(BAD, Instant::now(), &settings) == HealthAction::Reconnect {
                reconnects += 1;
            }
        }
        assert_eq!(reconnects, 51);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_does_not_lose_reconnect() {
        let transport = Arc::new(FakeTransport::new());
        transport.script_latencies(vec![BAD]);
        let monitor = HealthMonitor::new(transport, settings());

        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(GuildJob::WatchdogCheck).unwrap();
        let voice = VoiceHandle {
            guild_id: GuildId::new(5),
            channel_id: ChannelId::new(6),
        };
        monitor.track(voice, tx.downgrade());

        // Tres muestras malas con la cola llena: la petición se pierde y se deshace
        let first_attempt = settings().interval_normal + settings().interval_suspicious * 2;
        tokio::time::sleep(first_attempt + Duration::from_secs(1)).await;
        assert_eq!(monitor.state_of(voice.guild_id), Some(HealthState::Suspicious));

        assert!(matches!(rx.recv().await, Some(GuildJob::WatchdogCheck)));
        let job = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .unwrap();
        assert!(matches!(job, Some(GuildJob::Reconnect { reply: None })));
        monitor.untrack(voice.guild_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_task_requests_reconnect_and_stops_on_untrack() {
        let transport = Arc::new(FakeTransport::new());
        transport.script_latencies(vec![BAD, BAD, BAD, GOOD]);
        let monitor = HealthMonitor::new(transport.clone(), settings());

        let (tx, mut rx) = mpsc::channel(8);
        let voice = VoiceHandle {
            guild_id: GuildId::new(3),
            channel_id: ChannelId::new(4),
        };
        monitor.track(voice, tx.downgrade());
        assert_eq!(monitor.state_of(voice.guild_id), Some(HealthState::Normal));

        let job = tokio::time::timeout(Duration::from_secs(120), rx.recv())
            .await
            .unwrap();
        assert!(matches!(job, Some(GuildJob::Reconnect { reply: None })));
        assert_eq!(monitor.state_of(voice.guild_id), Some(HealthState::PostReconnect));

        monitor.untrack(voice.guild_id);
        assert_eq!(monitor.state_of(voice.guild_id), None);
        assert_eq!(monitor.tracked(), 0);
    }
}
