use std::{fmt, time::Duration};
use thiserror::Error;

use crate::admission::CommandKind;

/// Errores del subsistema de reproducción.
///
/// El `Display` de cada variante es el mensaje que ve el usuario, así que los
/// handlers pueden responder directamente con `error.to_string()`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("❌ La posición {} no existe (la cola tiene {len} pistas)", .index + 1)]
    OutOfRange { index: usize, len: usize },

    #[error("⚠️ No se pudo reproducir **{title}**: {reason}")]
    PlaybackFailed { title: String, reason: String },

    #[error("⏳ Estoy ocupado ({reason}), inténtalo de nuevo en un momento")]
    Busy { reason: BusyReason },

    #[error("⏳ /{kind} está en enfriamiento, espera {}", short(.remaining))]
    CoolingDown { kind: CommandKind, remaining: Duration },

    #[error("📡 La conexión de voz sigue degradada tras {attempts} reconexiones")]
    ConnectionDegraded { attempts: u32 },

    #[error("🧊 La reproducción se quedó colgada durante {}", short(.stalled_for))]
    Hang { stalled_for: Duration },

    #[error("🔇 No estoy conectado a un canal de voz")]
    NotConnected,

    #[error("🔇 No pude conectarme al canal de voz: {reason}")]
    VoiceUnavailable { reason: String },

    #[error("📭 La cola está vacía")]
    EmptyQueue,

    #[error("🔇 No hay nada sonando")]
    NothingPlaying,

    #[error("⚠️ El motor de audio no respondió: {reason}")]
    Control { reason: String },

    #[error("📂 {reason}")]
    Library { reason: String },

    #[error("🔌 La sesión de este servidor se cerró")]
    SessionClosed,
}

impl PlaybackError {
    /// Indica si el error debe quedar en el log operacional y no solo en la respuesta al usuario
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::ConnectionDegraded { .. } | Self::Hang { .. })
    }
}

/// Motivo de un rechazo `Busy`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    QueueFull,
    BreakerOpen { remaining: Duration },
}

impl fmt::Display for BusyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "cola de comandos llena"),
            Self::BreakerOpen { remaining } => {
                write!(f, "demasiados comandos, reabro en {}", short(remaining))
            }
        }
    }
}

pub type PlaybackResult<T> = Result<T, PlaybackError>;

/// Formatea una duración redondeada a décimas de segundo
fn short(duration: &Duration) -> humantime::FormattedDuration {
    let millis = (duration.as_millis() / 100 * 100) as u64;
    humantime::format_duration(Duration::from_millis(millis.max(100)))
}
