use std::collections::HashMap;
use tokio::time::Instant;

use crate::{
    admission::CommandKind,
    config::CooldownSettings,
    error::{PlaybackError, PlaybackResult},
};

/// Última ejecución por tipo de comando dentro de un guild
#[derive(Debug, Default)]
pub struct CooldownBook {
    last_run_at: HashMap<CommandKind, Instant>,
}

impl CooldownBook {
    pub fn check(&self, kind: CommandKind, now: Instant, settings: &CooldownSettings) -> PlaybackResult<()> {
        let Some(&last) = self.last_run_at.get(&kind) else {
            return Ok(());
        };

        let cooldown = settings.for_kind(kind);
        let elapsed = now.saturating_duration_since(last);
        if elapsed < cooldown {
            return Err(PlaybackError::CoolingDown {
                kind,
                remaining: cooldown - elapsed,
            });
        }
        Ok(())
    }

    pub fn record(&mut self, kind: CommandKind, now: Instant) {
        self.last_run_at.insert(kind, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_same_kind_only() {
        let settings = Config::default().cooldowns;
        let mut book = CooldownBook::default();

        book.record(CommandKind::Stop, Instant::now());
        tokio::time::advance(Duration::from_millis(500)).await;

        assert_eq!(
            book.check(CommandKind::Stop, Instant::now(), &settings),
            Err(PlaybackError::CoolingDown {
                kind: CommandKind::Stop,
                remaining: settings.stop - Duration::from_millis(500),
            })
        );
        assert!(book.check(CommandKind::Skip, Instant::now(), &settings).is_ok());
        assert!(book.check(CommandKind::Queue, Instant::now(), &settings).is_ok());

        tokio::time::advance(settings.stop).await;
        assert!(book.check(CommandKind::Stop, Instant::now(), &settings).is_ok());
    }
}
