use serenity::model::id::UserId;
use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;

use crate::{admission::CommandKind, config::AdmissionSettings};

/// Veredicto de la capa de ráfagas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstVerdict {
    Pass,
    /// Descartado en silencio
    Drop,
    /// Descartado; es el primer descarte de una sesión de spam y merece un aviso
    DropWithWarning,
}

#[derive(Debug, Default)]
struct UserBurst {
    recent: VecDeque<(CommandKind, Instant)>,
    spam_until: Option<Instant>,
}

/// Registros de ráfagas de un guild, uno por usuario
#[derive(Debug, Default)]
pub struct GuildBurst {
    users: HashMap<UserId, UserBurst>,
}

impl GuildBurst {
    pub fn check(
        &mut self,
        user: UserId,
        kind: CommandKind,
        now: Instant,
        settings: &AdmissionSettings,
    ) -> BurstVerdict {
        let record = self.users.entry(user).or_default();

        if let Some(until) = record.spam_until {
            if now < until {
                return BurstVerdict::Drop;
            }
            record.spam_until = None;
            record.recent.clear();
        }

        let horizon = settings.spam_trigger_window.max(settings.min_spacing);
        while let Some(&(_, at)) = record.recent.front() {
            if now.saturating_duration_since(at) > horizon {
                record.recent.pop_front();
            } else {
                break;
            }
        }

        // Eventos duplicados de la misma acción cuentan como uno solo
        let duplicate = record.recent.iter().any(|&(k, at)| {
            k == kind && now.saturating_duration_since(at) < settings.min_spacing
        });
        if duplicate {
            return BurstVerdict::Drop;
        }

        record.recent.push_back((kind, now));
        let in_window = record
            .recent
            .iter()
            .filter(|&&(_, at)| now.saturating_duration_since(at) <= settings.spam_trigger_window)
            .count();

        if in_window >= settings.spam_trigger_count {
            record.spam_until = Some(now + settings.spam_session_duration);
            return BurstVerdict::DropWithWarning;
        }

        BurstVerdict::Pass
    }

    #[cfg(test)]
    pub fn in_spam_session(&self, user: UserId, now: Instant) -> bool {
        self.users
            .get(&user)
            .and_then(|r| r.spam_until)
            .is_some_and(|until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;

    fn settings() -> AdmissionSettings {
        Config::default().admission
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_within_spacing_is_dropped() {
        let settings = settings();
        let mut burst = GuildBurst::default();
        let user = UserId::new(1);

        assert_eq!(burst.check(user, CommandKind::Skip, Instant::now(), &settings), BurstVerdict::Pass);
        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(burst.check(user, CommandKind::Skip, Instant::now(), &settings), BurstVerdict::Drop);

        tokio::time::advance(Duration::from_millis(900)).await;
        assert_eq!(burst.check(user, CommandKind::Skip, Instant::now(), &settings), BurstVerdict::Pass);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_users_do_not_share_spacing() {
        let settings = settings();
        let mut burst = GuildBurst::default();
        let now = Instant::now();

        assert_eq!(burst.check(UserId::new(1), CommandKind::Skip, now, &settings), BurstVerdict::Pass);
        assert_eq!(burst.check(UserId::new(2), CommandKind::Skip, now, &settings), BurstVerdict::Pass);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spam_session_warns_exactly_once() {
        let settings = settings();
        let mut burst = GuildBurst::default();
        let user = UserId::new(1);
        let kinds = [CommandKind::Skip, CommandKind::Queue, CommandKind::Loop, CommandKind::Shuffle];

        let mut verdicts = Vec::new();
        for kind in kinds.iter().cycle().take(10) {
            verdicts.push(burst.check(user, *kind, Instant::now(), &settings));
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        assert_eq!(&verdicts[..2], &[BurstVerdict::Pass, BurstVerdict::Pass]);
        assert_eq!(verdicts[2], BurstVerdict::DropWithWarning);
        assert!(verdicts[3..].iter().all(|v| *v == BurstVerdict::Drop));
        assert!(burst.in_spam_session(user, Instant::now()));

        // La sesión termina y el usuario vuelve a empezar de cero
        tokio::time::advance(settings.spam_session_duration).await;
        assert!(!burst.in_spam_session(user, Instant::now()));
        assert_eq!(burst.check(user, CommandKind::Stop, Instant::now(), &settings), BurstVerdict::Pass);
    }
}
