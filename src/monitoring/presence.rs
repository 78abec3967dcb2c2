use serenity::model::id::{ChannelId, UserId};
use tokio::time::Instant;
use tracing::debug;

use crate::config::AloneSettings;

/// Qué debe hacer el worker con la sesión según la presencia en el canal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AloneAction {
    None,
    Pause,
    Resume,
    Leave,
}

/// Seguimiento del tiempo que el bot lleva solo en su canal de voz.
///
/// La pausa automática ocurre una vez por periodo a solas y solo si algo sonaba;
/// la reanudación automática solo deshace esa pausa, nunca una pedida por un usuario.
#[derive(Debug, Default)]
pub struct AloneTracker {
    alone_since: Option<Instant>,
    pause_checked: bool,
    auto_paused: bool,
}

impl AloneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nuevo recuento de oyentes (usuarios no bot) en el canal del bot
    pub fn observe(&mut self, listeners: usize, now: Instant) -> AloneAction {
        if listeners == 0 {
            if self.alone_since.is_none() {
                debug!("Bot solo en el canal de voz");
                self.alone_since = Some(now);
            }
            return AloneAction::None;
        }

        let auto_paused = self.auto_paused;
        self.reset();
        if auto_paused {
            AloneAction::Resume
        } else {
            AloneAction::None
        }
    }

    /// Próximo instante en el que `poll` puede devolver una acción
    pub fn deadline(&self, settings: &AloneSettings) -> Option<Instant> {
        let since = self.alone_since?;
        if self.pause_checked {
            Some(since + settings.leave_after)
        } else {
            Some(since + settings.pause_after)
        }
    }

    pub fn poll(&mut self, now: Instant, playing: bool, settings: &AloneSettings) -> AloneAction {
        let Some(since) = self.alone_since else {
            return AloneAction::None;
        };
        let alone_for = now.saturating_duration_since(since);

        if alone_for >= settings.leave_after {
            self.reset();
            return AloneAction::Leave;
        }
        if alone_for >= settings.pause_after && !self.pause_checked {
            self.pause_checked = true;
            if playing {
                self.auto_paused = true;
                return AloneAction::Pause;
            }
        }
        AloneAction::None
    }

    /// Un usuario tomó el control: la pausa ya no es automática
    pub fn forget_auto_pause(&mut self) {
        self.auto_paused = false;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Usuarios humanos en `channel`; el propio bot y otros bots no cuentan
pub fn count_listeners(
    states: impl IntoIterator<Item = (UserId, Option<ChannelId>, bool)>,
    channel: ChannelId,
    bot_id: UserId,
) -> usize {
    states
        .into_iter()
        .filter(|(user_id, channel_id, is_bot)| {
            *channel_id == Some(channel) && *user_id != bot_id && !is_bot
        })
        .count()
}
