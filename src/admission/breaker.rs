use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

use crate::config::AdmissionSettings;

/// Multiplicadores de castigo por disparos consecutivos (1x, 2x, 4x, 8x)
const PENALTIES: [u32; 4] = [1, 2, 4, 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerVerdict {
    Admit,
    Open { remaining: Duration },
    /// Este comando abrió el breaker
    Tripped { open_for: Duration, trips: u32 },
}

/// Breaker de un guild: ventana móvil de comandos aceptados
#[derive(Debug, Default)]
pub struct BreakerRecord {
    accepted: VecDeque<Instant>,
    open_until: Option<Instant>,
    trips: u32,
}

impl BreakerRecord {
    pub fn admit(&mut self, now: Instant, settings: &AdmissionSettings) -> BreakerVerdict {
        if let Some(until) = self.open_until {
            if now < until {
                return BreakerVerdict::Open {
                    remaining: until - now,
                };
            }
            // Buen comportamiento desde el cierre: se perdona el historial
            if now.saturating_duration_since(until) >= settings.breaker_penalty_reset {
                self.trips = 0;
                self.open_until = None;
            }
        }

        while let Some(&at) = self.accepted.front() {
            if now.saturating_duration_since(at) > settings.breaker_window {
                self.accepted.pop_front();
            } else {
                break;
            }
        }

        self.accepted.push_back(now);
        if self.accepted.len() <= settings.breaker_max_commands {
            return BreakerVerdict::Admit;
        }

        self.trips += 1;
        let penalty = PENALTIES[(self.trips as usize).min(PENALTIES.len()) - 1];
        let open_for = settings.breaker_open_duration * penalty;
        self.open_until = Some(now + open_for);
        self.accepted.clear();

        BreakerVerdict::Tripped {
            open_for,
            trips: self.trips,
        }
    }

    #[cfg(test)]
    pub fn is_open(&self, now: Instant) -> bool {
        self.open_until.is_some_and(|until| now < until)
    }

    #[cfg(test)]
    pub fn trips(&self) -> u32 {
        self.trips
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use pretty_assertions::assert_eq;

    fn settings() -> AdmissionSettings {
        Config::default().admission
    }

    /// Satura el breaker y devuelve la duración de apertura
    fn flood(record: &mut BreakerRecord, now: Instant, settings: &AdmissionSettings) -> Duration {
        for _ in 0..settings.breaker_max_commands {
            assert_eq!(record.admit(now, settings), BreakerVerdict::Admit);
        }
        match record.admit(now, settings) {
            BreakerVerdict::Tripped { open_for, .. } => open_for,
            other => panic!("se esperaba disparo, llegó {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_above_threshold_and_reopens() {
        let settings = settings();
        let mut record = BreakerRecord::default();

        let open_for = flood(&mut record, Instant::now(), &settings);
        assert_eq!(open_for, settings.breaker_open_duration);
        assert!(matches!(
            record.admit(Instant::now(), &settings),
            BreakerVerdict::Open { .. }
        ));

        tokio::time::advance(open_for).await;
        assert!(!record.is_open(Instant::now()));
        assert_eq!(record.admit(Instant::now(), &settings), BreakerVerdict::Admit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_outside_window_do_not_count() {
        let settings = settings();
        let mut record = BreakerRecord::default();

        for _ in 0..30 {
            assert_eq!(record.admit(Instant::now(), &settings), BreakerVerdict::Admit);
            tokio::time::advance(settings.breaker_window / 2).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_progressive_penalties_escalate_and_reset() {
        let settings = settings();
        let mut record = BreakerRecord::default();
        let base = settings.breaker_open_duration;

        let mut durations = Vec::new();
        for _ in 0..5 {
            let open_for = flood(&mut record, Instant::now(), &settings);
            durations.push(open_for);
            tokio::time::advance(open_for).await;
        }
        assert_eq!(durations, vec![base, base * 2, base * 4, base * 8, base * 8]);
        assert_eq!(record.trips(), 5);

        tokio::time::advance(settings.breaker_penalty_reset).await;
        assert_eq!(flood(&mut record, Instant::now(), &settings), base);
        assert_eq!(record.trips(), 1);
    }
}
