use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::guild::{GuildJob, GuildRegistry};

/// Estado que la sesión espera observar en el motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedState {
    Idle,
    Playing,
    /// Pausa pedida: el motor no reporta progreso y no cuenta como bloqueo
    Paused,
}

/// Registro de progreso de una sesión, leído por el watchdog
#[derive(Debug, Clone, Copy)]
pub struct WatchdogRecord {
    last_progress_at: Instant,
    expected: ExpectedState,
}

impl WatchdogRecord {
    pub fn new() -> Self {
        Self {
            last_progress_at: Instant::now(),
            expected: ExpectedState::Idle,
        }
    }

    pub fn playing(&mut self, now: Instant) {
        self.expected = ExpectedState::Playing;
        self.last_progress_at = now;
    }

    pub fn paused(&mut self) {
        self.expected = ExpectedState::Paused;
    }

    pub fn idle(&mut self) {
        self.expected = ExpectedState::Idle;
    }

    pub fn progress(&mut self, now: Instant) {
        self.last_progress_at = now;
    }

    /// Tiempo sin progreso si la sesión debería estar sonando y superó `timeout`
    pub fn stalled_for(&self, now: Instant, timeout: Duration) -> Option<Duration> {
        if self.expected != ExpectedState::Playing {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_progress_at);
        (elapsed > timeout).then_some(elapsed)
    }

    pub fn expected(&self) -> ExpectedState {
        self.expected
    }
}

impl Default for WatchdogRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Tarea periódica: pide a cada worker vivo que revise si su reproducción se colgó.
///
/// La revisión en sí ocurre dentro del worker, en serie con los comandos.
pub async fn run_watchdog(registry: Arc<GuildRegistry>, interval: Duration, cancel: CancellationToken) {
    info!("🐕 Watchdog activo (cada {})", humantime::format_duration(interval));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // El primer tick es inmediato
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut checked = 0usize;
                for handle in registry.live_handles() {
                    if handle.try_enqueue(GuildJob::WatchdogCheck) {
                        checked += 1;
                    }
                }
                debug!("🐕 Watchdog revisó {} guilds", checked);
            }
        }
    }

    info!("🐕 Watchdog detenido");
}
