use serenity::model::id::{ChannelId, GuildId};
use std::ops::ControlFlow;
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, error, info, warn};

use super::{GuildHandle, GuildJob, WorkerDeps};
use crate::{
    admission::{Command, CommandReply, CooldownBook, Outcome},
    audio::{
        engine::{CompletionSender, EngineEvent},
        session::{Delivery, Direction, PlaybackSession, SessionToken},
    },
    error::{PlaybackError, PlaybackResult},
    monitoring::presence::{AloneAction, AloneTracker},
    storage::GuildPointers,
};

/// Dueño exclusivo de la sesión de un guild
pub struct GuildWorker {
    guild_id: GuildId,
    session: PlaybackSession,
    cooldowns: CooldownBook,
    alone: AloneTracker,
    last_job_at: Instant,
    deps: WorkerDeps,
    jobs: mpsc::Receiver<GuildJob>,
    /// Para que el monitor de salud pueda pedir reconexiones sin mantener vivo el canal
    weak_jobs: mpsc::WeakSender<GuildJob>,
}

impl GuildWorker {
    pub fn spawn(guild_id: GuildId, deps: WorkerDeps) -> GuildHandle {
        let (tx, rx) = mpsc::channel(deps.queue_capacity);
        let session = PlaybackSession::new(
            guild_id,
            deps.engine.clone(),
            deps.transport.clone(),
            CompletionSender::new(guild_id, tx.clone()),
        );

        let worker = Self {
            guild_id,
            session,
            cooldowns: CooldownBook::default(),
            alone: AloneTracker::new(),
            last_job_at: Instant::now(),
            deps,
            jobs: rx,
            weak_jobs: tx.downgrade(),
        };
        tokio::spawn(worker.run());

        GuildHandle { guild_id, jobs: tx }
    }

    async fn run(mut self) {
        info!("🎛️ Sesión iniciada para guild {}", self.guild_id);
        self.restore().await;

        loop {
            let alone_at = self.alone.deadline(&self.deps.alone);
            // Sin voz y sin trabajo, el worker se retira; el registro crea otro si hace falta
            let retire_at = self
                .session
                .voice()
                .is_none()
                .then(|| self.last_job_at + self.deps.idle_retire);

            tokio::select! {
                job = self.jobs.recv() => {
                    let Some(job) = job else { break };
                    self.last_job_at = Instant::now();
                    if self.handle(job).await.is_break() {
                        break;
                    }
                }
                _ = until(alone_at) => self.alone_timer().await,
                _ = until(retire_at) => {
                    self.retire().await;
                    break;
                }
            }
        }

        info!("🎛️ Sesión terminada para guild {}", self.guild_id);
    }

    async fn handle(&mut self, job: GuildJob) -> ControlFlow<()> {
        match job {
            GuildJob::Command { command, reply } => {
                let result = self.execute(command).await;
                let _ = reply.send(result);
            }
            GuildJob::Engine(EngineEvent::Finished { token }) => self.track_finished(token).await,
            GuildJob::Engine(EngineEvent::Progress { token }) => {
                self.session.on_progress(token);
            }
            GuildJob::Reconnect { reply } => {
                let result = self.reconnect().await;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            GuildJob::WatchdogCheck => {
                if self
                    .session
                    .recover_if_hung(self.deps.watchdog_timeout)
                    .await
                    .is_some()
                {
                    self.discard_incidents();
                }
            }
            GuildJob::Listeners { count } => self.listeners_changed(count).await,
            GuildJob::VoiceLost => self.voice_lost().await,
            GuildJob::Shutdown { done } => {
                self.shutdown().await;
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Cierra el canal y rechaza lo que quedó en cola sin ejecutarlo
    async fn retire(&mut self) {
        info!("💤 Guild {}: sesión inactiva, liberando el worker", self.guild_id);
        self.jobs.close();
        while let Some(job) = self.jobs.recv().await {
            match job {
                GuildJob::Command { reply, .. } => {
                    let _ = reply.send(Err(PlaybackError::SessionClosed));
                }
                GuildJob::Reconnect { reply: Some(reply) } => {
                    let _ = reply.send(Err(PlaybackError::SessionClosed));
                }
                GuildJob::Shutdown { done } => {
                    let _ = done.send(());
                }
                _ => {}
            }
        }
    }

    /// Recupera la última playlist y, si estaba conectado, el canal de voz
    async fn restore(&mut self) {
        let pointers = self.deps.pointers.get(self.guild_id);

        let tracks = match self.deps.catalog.load(pointers.last_playlist.as_deref()).await {
            Ok(tracks) => Some((pointers.last_playlist.clone(), tracks)),
            Err(e) if pointers.last_playlist.is_some() => {
                warn!(
                    "Guild {}: no se pudo restaurar la playlist {:?} ({}), usando la principal",
                    self.guild_id, pointers.last_playlist, e
                );
                self.deps.catalog.load(None).await.ok().map(|t| (None, t))
            }
            Err(e) => {
                warn!("Guild {}: biblioteca no disponible: {}", self.guild_id, e);
                None
            }
        };
        if let Some((name, tracks)) = tracks {
            self.session.load_playlist(name, tracks).await;
        }
        self.session
            .set_volume(pointers.volume.unwrap_or(self.deps.default_volume))
            .await;

        if let Some(channel) = pointers.last_voice_channel {
            match self.deps.transport.join(self.guild_id, ChannelId::new(channel)).await {
                Ok(voice) => {
                    self.session.attach_voice(voice);
                    self.deps.health.track(voice, self.weak_jobs.clone());
                    info!("🔊 Guild {}: reconectado al último canal de voz", self.guild_id);
                }
                Err(e) => warn!("Guild {}: no se pudo volver al canal {}: {}", self.guild_id, channel, e),
            }
        }
    }

    async fn execute(&mut self, command: Command) -> PlaybackResult<CommandReply> {
        let kind = command.kind();
        self.cooldowns
            .check(kind, Instant::now(), &self.deps.cooldowns)?;

        let result = self.apply(command).await;
        self.cooldowns.record(kind, Instant::now());

        let incidents = self.session.take_incidents();
        let outcome = result?;
        Ok(CommandReply {
            outcome,
            incidents,
            snapshot: self.session.snapshot(),
        })
    }

    async fn apply(&mut self, command: Command) -> PlaybackResult<Outcome> {
        match command {
            Command::Join {
                channel_id,
                text_channel_id,
            } => {
                self.connect(channel_id, text_channel_id).await?;
                Ok(Outcome::Joined { channel_id })
            }
            Command::Leave => {
                if self.session.voice().is_none() {
                    return Err(PlaybackError::NotConnected);
                }
                self.disconnect().await?;
                Ok(Outcome::Left)
            }
            Command::Play {
                index,
                playlist,
                channel_id,
                text_channel_id,
            } => self.play(index, playlist, channel_id, text_channel_id).await,
            Command::Pause => {
                self.alone.forget_auto_pause();
                Ok(match self.session.pause().await? {
                    true => Outcome::Paused,
                    false => Outcome::Unchanged,
                })
            }
            Command::Resume => self.resume().await,
            Command::Volume { percent } => {
                self.session.set_volume(percent).await;
                self.remember(|p| p.volume = Some(percent)).await;
                Ok(Outcome::Volume(percent))
            }
            Command::Skip => Ok(match self.session.skip().await? {
                Some(_) => self.playing_outcome(),
                None => Outcome::QueueEnded,
            }),
            Command::Previous => Ok(match self.session.advance(Direction::Backward).await? {
                Some(_) => self.playing_outcome(),
                None => Outcome::Unchanged,
            }),
            Command::Stop => {
                self.session.stop_manually().await;
                if self.session.voice().is_some() {
                    self.disconnect().await?;
                }
                Ok(Outcome::Stopped)
            }
            Command::Shuffle => Ok(Outcome::Shuffle(self.session.toggle_shuffle())),
            Command::Loop => Ok(Outcome::Loop(self.session.toggle_loop())),
            Command::Queue => Ok(Outcome::Queue),
            Command::NowPlaying => Ok(Outcome::NowPlaying),
            Command::Playlists => {
                let names = self
                    .deps
                    .catalog
                    .playlists()
                    .await
                    .map_err(|e| PlaybackError::Library { reason: e.to_string() })?;
                Ok(Outcome::Playlists(names))
            }
        }
    }

    async fn play(
        &mut self,
        index: Option<usize>,
        playlist: Option<String>,
        channel_id: Option<ChannelId>,
        text_channel_id: ChannelId,
    ) -> PlaybackResult<Outcome> {
        if self.session.voice().is_none() {
            let channel_id = channel_id.ok_or(PlaybackError::NotConnected)?;
            self.connect(channel_id, text_channel_id).await?;
        }

        let switching = playlist.is_some() && playlist.as_deref() != self.session.playlist();
        if switching {
            let tracks = self
                .deps
                .catalog
                .load(playlist.as_deref())
                .await
                .map_err(|e| PlaybackError::Library { reason: e.to_string() })?;
            self.session.load_playlist(playlist.clone(), tracks).await;
            self.remember(|p| p.last_playlist = playlist).await;
        }

        if self.session.queue_len() == 0 {
            return Err(PlaybackError::EmptyQueue);
        }

        match index {
            Some(index) => {
                self.session.play_track(index).await?;
            }
            None if self.session.is_playing() => return Ok(Outcome::NowPlaying),
            None if self.session.is_paused() => return self.resume().await,
            None => {
                let start = self.session.cursor().unwrap_or(0);
                self.session.play_track(start).await?;
            }
        }
        Ok(self.playing_outcome())
    }

    async fn resume(&mut self) -> PlaybackResult<Outcome> {
        self.alone.forget_auto_pause();
        Ok(match self.session.resume().await? {
            true => Outcome::Resumed,
            false => Outcome::Unchanged,
        })
    }

    fn playing_outcome(&self) -> Outcome {
        let snapshot = self.session.snapshot();
        match (snapshot.now_playing, snapshot.position) {
            (Some(title), Some(position)) => Outcome::Playing {
                title,
                position,
                len: snapshot.queue.len(),
            },
            _ => Outcome::Stopped,
        }
    }

    async fn connect(&mut self, channel_id: ChannelId, text_channel_id: ChannelId) -> PlaybackResult<()> {
        if let Some(current) = self.session.voice() {
            if current.channel_id == channel_id {
                return Ok(());
            }
            self.disconnect().await?;
        }

        let voice = self.deps.transport.join(self.guild_id, channel_id).await?;
        self.session.attach_voice(voice);
        self.alone.reset();
        self.deps.health.track(voice, self.weak_jobs.clone());

        self.remember(|p| {
            p.last_voice_channel = Some(channel_id.get());
            p.last_text_channel = Some(text_channel_id.get());
        })
        .await;
        Ok(())
    }

    async fn disconnect(&mut self) -> PlaybackResult<()> {
        self.deps.health.untrack(self.guild_id);
        self.alone.reset();
        if let Some(voice) = self.session.detach_voice().await {
            self.deps.transport.leave(&voice).await?;
        }
        self.remember(|p| p.last_voice_channel = None).await;
        Ok(())
    }

    async fn track_finished(&mut self, token: SessionToken) {
        match self.session.on_track_finished(token).await {
            Ok(Delivery::Applied) => self.discard_incidents(),
            Ok(Delivery::Stale) => {}
            Err(e) => {
                self.discard_incidents();
                error!("❌ Guild {}: no se pudo continuar la cola: {}", self.guild_id, e);
            }
        }
    }

    async fn reconnect(&mut self) -> PlaybackResult<()> {
        let result = self.session.reconnect().await;
        if let Err(e) = &result {
            if self.session.voice().is_none() {
                self.deps.health.untrack(self.guild_id);
            }
            warn!("🔄 Guild {}: reconexión fallida: {}", self.guild_id, e);
        }
        result
    }

    async fn voice_lost(&mut self) {
        let Some(voice) = self.session.voice() else {
            return;
        };
        // Una reconexión propia también genera este evento
        if self.deps.transport.is_connected(&voice).await {
            debug!("Guild {}: desconexión ignorada, la llamada sigue activa", self.guild_id);
            return;
        }

        self.deps.health.untrack(self.guild_id);
        self.alone.reset();
        self.session.detach_voice().await;
        self.remember(|p| p.last_voice_channel = None).await;
        info!("🔇 Guild {}: desconectado de voz desde fuera", self.guild_id);
    }

    async fn listeners_changed(&mut self, count: usize) {
        if self.session.voice().is_none() {
            self.alone.reset();
            return;
        }
        if self.alone.observe(count, Instant::now()) != AloneAction::Resume || !self.session.is_paused() {
            return;
        }
        match self.session.resume().await {
            Ok(_) => info!("▶️ Guild {}: alguien volvió al canal, reanudando", self.guild_id),
            Err(e) => warn!("Guild {}: no se pudo reanudar: {}", self.guild_id, e),
        }
    }

    async fn alone_timer(&mut self) {
        match self
            .alone
            .poll(Instant::now(), self.session.is_playing(), &self.deps.alone)
        {
            AloneAction::Pause => match self.session.pause().await {
                Ok(_) => info!("⏸️ Guild {}: nadie escuchando, pausa automática", self.guild_id),
                Err(e) => {
                    self.alone.forget_auto_pause();
                    warn!("Guild {}: no se pudo pausar: {}", self.guild_id, e);
                }
            },
            AloneAction::Leave => {
                info!("👋 Guild {}: demasiado tiempo solo en el canal, desconectando", self.guild_id);
                if let Err(e) = self.disconnect().await {
                    warn!("Guild {}: error al salir de voz: {}", self.guild_id, e);
                }
            }
            AloneAction::None | AloneAction::Resume => {}
        }
    }

    async fn shutdown(&mut self) {
        self.deps.health.untrack(self.guild_id);
        if let Some(voice) = self.session.detach_voice().await {
            if let Err(e) = self.deps.transport.leave(&voice).await {
                warn!("Guild {}: error al salir de voz: {}", self.guild_id, e);
            }
        }
    }

    /// Los fallos de avances automáticos ya quedaron en el log
    fn discard_incidents(&mut self) {
        let incidents = self.session.take_incidents();
        if !incidents.is_empty() {
            debug!("Guild {}: {} incidentes registrados", self.guild_id, incidents.len());
        }
    }

    async fn remember(&self, f: impl FnOnce(&mut GuildPointers)) {
        if let Err(e) = self.deps.pointers.update(self.guild_id, f).await {
            warn!("Guild {}: no se pudieron guardar los punteros: {:?}", self.guild_id, e);
        }
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
