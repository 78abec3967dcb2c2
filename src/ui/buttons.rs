use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

use crate::{admission::Command, audio::session::SessionSnapshot};

/// IDs personalizados para los botones
pub mod button_ids {
    pub const PREVIOUS: &str = "jukebox_previous";
    pub const PAUSE: &str = "jukebox_pause";
    pub const RESUME: &str = "jukebox_resume";
    pub const SKIP: &str = "jukebox_skip";
    pub const STOP: &str = "jukebox_stop";
    pub const SHUFFLE: &str = "jukebox_shuffle";
    pub const LOOP_TRACK: &str = "jukebox_loop";
}

/// Estado visual de un botón del reproductor
#[derive(Debug, Clone, PartialEq)]
struct ButtonSpec {
    id: &'static str,
    emoji: char,
    style: ButtonStyle,
    disabled: bool,
}

/// Transporte en la primera fila, modos en la segunda
fn player_controls(snapshot: &SessionSnapshot) -> Vec<Vec<ButtonSpec>> {
    let toggle = |on: bool| {
        if on {
            ButtonStyle::Success
        } else {
            ButtonStyle::Secondary
        }
    };
    let pause_or_resume = if snapshot.paused {
        ButtonSpec {
            id: button_ids::RESUME,
            emoji: '▶',
            style: ButtonStyle::Success,
            disabled: false,
        }
    } else {
        ButtonSpec {
            id: button_ids::PAUSE,
            emoji: '⏸',
            style: ButtonStyle::Secondary,
            disabled: !snapshot.playing,
        }
    };

    let transport = vec![
        ButtonSpec {
            id: button_ids::PREVIOUS,
            emoji: '⏮',
            style: ButtonStyle::Secondary,
            disabled: matches!(snapshot.position, None | Some(0)),
        },
        pause_or_resume,
        ButtonSpec {
            id: button_ids::SKIP,
            emoji: '⏭',
            style: ButtonStyle::Primary,
            disabled: false,
        },
        ButtonSpec {
            id: button_ids::STOP,
            emoji: '⏹',
            style: ButtonStyle::Danger,
            disabled: !snapshot.playing,
        },
    ];
    let modes = vec![
        ButtonSpec {
            id: button_ids::SHUFFLE,
            emoji: '🔀',
            style: toggle(snapshot.shuffle),
            disabled: false,
        },
        ButtonSpec {
            id: button_ids::LOOP_TRACK,
            emoji: '🔂',
            style: toggle(snapshot.loop_track),
            disabled: false,
        },
    ];

    vec![transport, modes]
}

/// Filas de controles del reproductor según el estado de la sesión.
///
/// Sin conexión de voz o sin cola no hay nada que controlar y no se devuelve ninguna fila.
pub fn create_player_buttons(snapshot: &SessionSnapshot) -> Vec<CreateActionRow> {
    if !snapshot.connected || snapshot.queue.is_empty() {
        return Vec::new();
    }

    player_controls(snapshot)
        .into_iter()
        .map(|row| {
            let buttons = row
                .into_iter()
                .map(|spec| {
                    CreateButton::new(spec.id)
                        .emoji(spec.emoji)
                        .style(spec.style)
                        .disabled(spec.disabled)
                })
                .collect();
            CreateActionRow::Buttons(buttons)
        })
        .collect()
}

/// Traduce el `custom_id` de un botón al comando equivalente
pub fn button_command(custom_id: &str) -> Option<Command> {
    match custom_id {
        button_ids::PREVIOUS => Some(Command::Previous),
        button_ids::PAUSE => Some(Command::Pause),
        button_ids::RESUME => Some(Command::Resume),
        button_ids::SKIP => Some(Command::Skip),
        button_ids::STOP => Some(Command::Stop),
        button_ids::SHUFFLE => Some(Command::Shuffle),
        button_ids::LOOP_TRACK => Some(Command::Loop),
        _ => None,
    }
}
