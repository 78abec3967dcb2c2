use serenity::model::id::ChannelId;
use std::{fmt, time::Duration};

use crate::{audio::session::SessionSnapshot, error::PlaybackError};

/// Máximo de pistas listadas en /queue
const QUEUE_PREVIEW: usize = 15;

/// Comando de usuario ya interpretado
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join {
        channel_id: ChannelId,
        text_channel_id: ChannelId,
    },
    Leave,
    /// `index` es 0-based; `channel_id` es el canal de voz del usuario si el bot aún no está conectado
    Play {
        index: Option<usize>,
        playlist: Option<String>,
        channel_id: Option<ChannelId>,
        text_channel_id: ChannelId,
    },
    Pause,
    /// Reanuda sin tocar la cola; `/play` sin argumentos hace lo mismo
    Resume,
    /// Porcentaje 0-100
    Volume { percent: u8 },
    Skip,
    Previous,
    Stop,
    Shuffle,
    Loop,
    Queue,
    NowPlaying,
    Playlists,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Join { .. } => CommandKind::Join,
            Self::Leave => CommandKind::Leave,
            Self::Play { .. } => CommandKind::Play,
            Self::Pause | Self::Resume => CommandKind::Pause,
            Self::Volume { .. } => CommandKind::Volume,
            Self::Skip => CommandKind::Skip,
            Self::Previous => CommandKind::Previous,
            Self::Stop => CommandKind::Stop,
            Self::Shuffle => CommandKind::Shuffle,
            Self::Loop => CommandKind::Loop,
            Self::Queue => CommandKind::Queue,
            Self::NowPlaying => CommandKind::NowPlaying,
            Self::Playlists => CommandKind::Playlists,
        }
    }
}

/// Tipo lógico de comando; cada uno tiene su propio enfriamiento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Join,
    Leave,
    Play,
    Pause,
    Volume,
    Skip,
    Previous,
    Stop,
    Shuffle,
    Loop,
    Queue,
    NowPlaying,
    Playlists,
}

impl CommandKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Volume => "volume",
            Self::Skip => "skip",
            Self::Previous => "previous",
            Self::Stop => "stop",
            Self::Shuffle => "shuffle",
            Self::Loop => "loop",
            Self::Queue => "queue",
            Self::NowPlaying => "nowplaying",
            Self::Playlists => "playlists",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Efecto principal de un comando ejecutado
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Joined { channel_id: ChannelId },
    Left,
    Playing { title: String, position: usize, len: usize },
    Paused,
    Resumed,
    Volume(u8),
    Stopped,
    QueueEnded,
    Unchanged,
    Shuffle(bool),
    Loop(bool),
    Queue,
    NowPlaying,
    Playlists(Vec<String>),
}

/// Respuesta de un comando: resultado, incidentes de reproducción y estado final
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub outcome: Outcome,
    pub incidents: Vec<PlaybackError>,
    pub snapshot: SessionSnapshot,
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = &self.snapshot;
        match &self.outcome {
            Outcome::Joined { channel_id } => write!(f, "🔊 Conectado a <#{}>", channel_id)?,
            Outcome::Left => write!(f, "👋 Desconectado del canal de voz")?,
            Outcome::Playing { title, position, len } => {
                write!(f, "🎵 Reproduciendo **{}** ({}/{})", title, position + 1, len)?
            }
            Outcome::Paused => write!(f, "⏸️ Reproducción en pausa")?,
            Outcome::Resumed => match &snapshot.now_playing {
                Some(title) => write!(f, "▶️ Reanudando **{}**", title)?,
                None => write!(f, "▶️ Reproducción reanudada")?,
            },
            Outcome::Volume(percent) => write!(f, "🔊 Volumen al {}%", percent)?,
            Outcome::Stopped => write!(f, "⏹️ Reproducción detenida")?,
            Outcome::QueueEnded => write!(f, "⏹️ Fin de la cola")?,
            Outcome::Unchanged => write!(f, "ℹ️ Nada que cambiar")?,
            Outcome::Shuffle(on) => write!(f, "🔀 Shuffle {}", if *on { "activado" } else { "desactivado" })?,
            Outcome::Loop(on) => write!(f, "🔂 Loop {}", if *on { "activado" } else { "desactivado" })?,
            Outcome::NowPlaying => match (&snapshot.now_playing, snapshot.position) {
                (Some(title), Some(position)) => {
                    write!(f, "🎵 Sonando: **{}** ({}/{})", title, position + 1, snapshot.queue.len())?;
                    if let Some(length) = snapshot.now_playing_length {
                        write!(f, " · ⏱️ {}", clock(length))?;
                    }
                }
                _ => write!(f, "🔇 No hay nada sonando")?,
            },
            Outcome::Queue => write_queue(f, snapshot)?,
            Outcome::Playlists(names) if names.is_empty() => {
                write!(f, "📂 No hay playlists, solo la biblioteca principal")?
            }
            Outcome::Playlists(names) => {
                write!(f, "📂 Playlists disponibles:")?;
                for name in names {
                    let marker = if snapshot.playlist.as_deref() == Some(name.as_str()) {
                        " ◀️"
                    } else {
                        ""
                    };
                    write!(f, "\n• {}{}", name, marker)?;
                }
            }
        }

        for incident in &self.incidents {
            write!(f, "\n{}", incident)?;
        }
        Ok(())
    }
}

/// 3:25 o 1:02:03
fn clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn write_queue(f: &mut fmt::Formatter<'_>, snapshot: &SessionSnapshot) -> fmt::Result {
    if snapshot.queue.is_empty() {
        return write!(f, "📭 La cola está vacía");
    }

    write!(
        f,
        "📜 Cola ({} pistas{}{}):",
        snapshot.queue.len(),
        if snapshot.shuffle { ", 🔀" } else { "" },
        if snapshot.loop_track { ", 🔂" } else { "" }
    )?;

    // Ventana centrada en la pista actual
    let start = snapshot
        .position
        .map_or(0, |p| p.saturating_sub(QUEUE_PREVIEW / 2))
        .min(snapshot.queue.len().saturating_sub(QUEUE_PREVIEW));
    for (i, title) in snapshot.queue.iter().enumerate().skip(start).take(QUEUE_PREVIEW) {
        let marker = if Some(i) == snapshot.position { "▶️ " } else { "" };
        write!(f, "\n{}**{}.** {}", marker, i + 1, title)?;
    }

    let remaining = snapshot.queue.len().saturating_sub(start + QUEUE_PREVIEW);
    if remaining > 0 {
        write!(f, "\n… y {} más", remaining)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::session::SessionToken;
    use pretty_assertions::assert_eq;

    fn snapshot(queue: &[&str], position: Option<usize>) -> SessionSnapshot {
        SessionSnapshot {
            now_playing: position.map(|p| queue[p].to_string()),
            now_playing_length: None,
            position,
            queue: queue.iter().map(|t| t.to_string()).collect(),
            playlist: None,
            shuffle: false,
            loop_track: false,
            playing: position.is_some(),
            paused: false,
            volume: 50,
            connected: true,
            token: SessionToken::from(1),
        }
    }

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(Command::Skip.kind().to_string(), "skip");
        assert_eq!(Command::NowPlaying.kind().to_string(), "nowplaying");
        assert_eq!(
            Command::Play {
                index: Some(1),
                playlist: None,
                channel_id: None,
                text_channel_id: ChannelId::new(1),
            }
            .kind(),
            CommandKind::Play
        );
    }

    #[test]
    fn test_pause_and_resume_share_cooldown() {
        assert_eq!(Command::Pause.kind(), CommandKind::Pause);
        assert_eq!(Command::Resume.kind(), CommandKind::Pause);
        assert_eq!(Command::Volume { percent: 30 }.kind().to_string(), "volume");
    }

    #[test]
    fn test_resume_and_volume_replies() {
        let reply = CommandReply {
            outcome: Outcome::Resumed,
            incidents: Vec::new(),
            snapshot: snapshot(&["A", "B"], Some(1)),
        };
        assert_eq!(reply.to_string(), "▶️ Reanudando **B**");

        let reply = CommandReply {
            outcome: Outcome::Volume(35),
            ..reply
        };
        assert_eq!(reply.to_string(), "🔊 Volumen al 35%");
    }

    #[test]
    fn test_reply_lists_incidents_after_outcome() {
        let reply = CommandReply {
            outcome: Outcome::Playing {
                title: "C".to_string(),
                position: 2,
                len: 3,
            },
            incidents: vec![PlaybackError::PlaybackFailed {
                title: "B".to_string(),
                reason: "archivo corrupto".to_string(),
            }],
            snapshot: snapshot(&["A", "B", "C"], Some(2)),
        };

        assert_eq!(
            reply.to_string(),
            "🎵 Reproduciendo **C** (3/3)\n⚠️ No se pudo reproducir **B**: archivo corrupto"
        );
    }

    #[test]
    fn test_queue_marks_current_track() {
        let reply = CommandReply {
            outcome: Outcome::Queue,
            incidents: Vec::new(),
            snapshot: snapshot(&["A", "B"], Some(1)),
        };
        assert_eq!(reply.to_string(), "📜 Cola (2 pistas):\n**1.** A\n▶️ **2.** B");
    }

    #[test]
    fn test_now_playing_shows_length_when_known() {
        let mut state = snapshot(&["A", "B"], Some(0));
        state.now_playing_length = Some(Duration::from_secs(205));
        let reply = CommandReply {
            outcome: Outcome::NowPlaying,
            incidents: Vec::new(),
            snapshot: state,
        };
        assert_eq!(reply.to_string(), "🎵 Sonando: **A** (1/2) · ⏱️ 3:25");
    }
}
