//! # Bot Module
//!
//! Discord host for the jukebox.
//!
//! This module contains the serenity-facing layer:
//! - Slash command registration ([`commands`])
//! - Interaction handling: slash commands and player buttons are parsed into a
//!   [`Command`](crate::admission::Command) and sent through admission control
//!   ([`handlers`])
//! - Event handling (ready, interactions, voice state updates)
//! - Background tasks started on the first `ready`: hourly maintenance and the
//!   hang watchdog
//!
//! Voice state updates do double duty: the bot's own disconnect becomes a
//! `VoiceLost` job, and any change in the bot's channel sends the worker a
//! fresh listener count for the alone timer.
//!
//! ## Architecture
//!
//! [`JukeboxBot`] implements Serenity's [`EventHandler`] trait. It holds no
//! playback state of its own; every guild's session lives in its worker (see
//! [`crate::guild`]) and the handler only reaches it through
//! [`AdmissionControl`].
//!
//! ## Startup restore
//!
//! On `ready`, every guild whose pointer file still names a voice channel gets
//! its worker spawned. The worker reloads the last playlist and rejoins that
//! channel before it takes any command.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    admission::AdmissionControl,
    config::Config,
    guild::{GuildJob, GuildRegistry},
    monitoring::{presence::count_listeners, run_watchdog},
    storage::PointerStore,
};

/// Handler de eventos de Discord para el jukebox
pub struct JukeboxBot {
    config: Arc<Config>,
    admission: Arc<AdmissionControl>,
    registry: Arc<GuildRegistry>,
    pointers: Arc<PointerStore>,
    /// `ready` se repite tras cada reconexión del gateway
    started: AtomicBool,
    cancel: CancellationToken,
}

impl JukeboxBot {
    pub fn new(
        config: Arc<Config>,
        admission: Arc<AdmissionControl>,
        registry: Arc<GuildRegistry>,
        pointers: Arc<PointerStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            admission,
            registry,
            pointers,
            started: AtomicBool::new(false),
            cancel,
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Guild commands (when `GUILD_ID` is set) propagate in about a second;
    /// global commands can take up to an hour.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!(
                        "No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild."
                    )
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!(
                        "No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'."
                    )
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    fn start_background_tasks(&self) {
        let admission = self.admission.clone();
        let registry = self.registry.clone();
        let interval = self.config.admission.maintenance_interval;
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            maintenance_tasks(admission, registry, interval, cancel).await;
        });

        tokio::spawn(run_watchdog(
            self.registry.clone(),
            self.config.watchdog.interval,
            self.cancel.clone(),
        ));
    }

    /// Levanta los workers de los guilds que seguían conectados a voz
    fn restore_sessions(&self) {
        let guilds = self.pointers.guilds_with_voice();
        if guilds.is_empty() {
            return;
        }

        info!("♻️ Restaurando {} sesiones de voz", guilds.len());
        for guild_id in guilds {
            self.registry.handle(guild_id);
        }
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.start_background_tasks();
        self.restore_sessions();
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component_interaction) => {
                if let Err(e) = handlers::handle_component(&ctx, component_interaction, self).await {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Detecta desconexiones del bot y cambios de oyentes en su canal
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(handle) = self.registry.get(guild_id) else {
            return;
        };
        let current_user_id = ctx.cache.current_user().id;

        if new.user_id == current_user_id && new.channel_id.is_none() {
            if old.is_some() {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                if !handle.try_enqueue(GuildJob::VoiceLost) {
                    warn!("No se pudo notificar la desconexión al worker de guild {}", guild_id);
                }
            }
            return;
        }

        let listeners = {
            let Some(guild) = ctx.cache.guild(guild_id) else {
                return;
            };
            let Some(channel) = guild
                .voice_states
                .get(&current_user_id)
                .and_then(|state| state.channel_id)
            else {
                return;
            };
            count_listeners(
                guild.voice_states.values().map(|state| {
                    let is_bot = state.member.as_ref().is_some_and(|m| m.user.bot);
                    (state.user_id, state.channel_id, is_bot)
                }),
                channel,
                current_user_id,
            )
        };

        if !handle.try_enqueue(GuildJob::Listeners { count: listeners }) {
            warn!("No se pudo enviar el recuento de oyentes al worker de guild {}", guild_id);
        }
    }
}

/// Runs periodic maintenance until `cancel` fires.
///
/// Evicts admission records (burst and breaker state) of guilds that have been
/// idle for longer than `ADMISSION_IDLE_EVICTION`, and drops registry entries
/// of workers that retired on their own.
async fn maintenance_tasks(
    admission: Arc<AdmissionControl>,
    registry: Arc<GuildRegistry>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let evicted = admission.evict_idle(Instant::now());
        let retired = registry.prune_retired();
        info!(
            "🧹 Tareas de mantenimiento completadas ({} registros eliminados, {} workers liberados, {} guilds activos)",
            evicted,
            retired,
            admission.tracked_guilds()
        );
    }
}
