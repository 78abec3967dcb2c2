use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serenity::model::id::GuildId;
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        engine::{AudioEngine, CompletionSender},
        track::Track,
        transport::{VoiceHandle, VoiceTransport},
    },
    error::{PlaybackError, PlaybackResult},
    monitoring::watchdog::{ExpectedState, WatchdogRecord},
};

/// Generación de reproducción de un guild.
///
/// Solo crece. Toda notificación del motor lleva el token vigente al iniciar la
/// pista; si ya no coincide, la notificación es obsoleta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(u64);

impl SessionToken {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for SessionToken {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Resultado de entregar una notificación del motor a la sesión
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Stale,
    Applied,
}

/// Siguiente paso calculado por la política de avance
enum Step {
    Play(usize),
    Stop,
    Stay,
}

/// Vista de solo lectura para respuestas y botones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub now_playing: Option<String>,
    pub now_playing_length: Option<Duration>,
    pub position: Option<usize>,
    pub queue: Vec<String>,
    pub playlist: Option<String>,
    pub shuffle: bool,
    pub loop_track: bool,
    pub playing: bool,
    pub paused: bool,
    /// Porcentaje, 100 es la ganancia original
    pub volume: u8,
    pub connected: bool,
    pub token: SessionToken,
}

/// Volumen inicial hasta que el worker aplique el configurado o el guardado
const DEFAULT_VOLUME: u8 = 50;

/// Estado de reproducción de un guild.
///
/// Pertenece en exclusiva al worker del guild: todas las mutaciones, sean de
/// comandos o del motor, llegan en serie por el mismo canal.
pub struct PlaybackSession {
    guild_id: GuildId,
    queue: Vec<Track>,
    library_order: Vec<Track>,
    playlist: Option<String>,
    cursor: Option<usize>,
    shuffle: bool,
    loop_track: bool,
    voice: Option<VoiceHandle>,
    /// Token de la pista que el motor está reproduciendo ahora mismo
    active: Option<SessionToken>,
    token: SessionToken,
    suppressed: bool,
    volume: u8,
    watchdog: WatchdogRecord,
    incidents: Vec<PlaybackError>,
    rng: StdRng,
    engine: Arc<dyn AudioEngine>,
    transport: Arc<dyn VoiceTransport>,
    completions: CompletionSender,
}

impl PlaybackSession {
    pub fn new(
        guild_id: GuildId,
        engine: Arc<dyn AudioEngine>,
        transport: Arc<dyn VoiceTransport>,
        completions: CompletionSender,
    ) -> Self {
        Self {
            guild_id,
            queue: Vec::new(),
            library_order: Vec::new(),
            playlist: None,
            cursor: None,
            shuffle: false,
            loop_track: false,
            voice: None,
            active: None,
            token: SessionToken::default(),
            suppressed: false,
            volume: DEFAULT_VOLUME,
            watchdog: WatchdogRecord::new(),
            incidents: Vec::new(),
            rng: StdRng::from_entropy(),
            engine,
            transport,
            completions,
        }
    }

    #[cfg(test)]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Reproduce la pista en `index` y devuelve el nuevo token
    pub async fn play_track(&mut self, index: usize) -> PlaybackResult<SessionToken> {
        if index >= self.queue.len() {
            return Err(PlaybackError::OutOfRange {
                index,
                len: self.queue.len(),
            });
        }
        let voice = self.voice.ok_or(PlaybackError::NotConnected)?;

        self.token = self.token.next();
        if self.active.take().is_some() {
            self.engine.stop(&voice).await;
        }
        self.cursor = Some(index);

        let track = &self.queue[index];
        match self
            .engine
            .start(&voice, track, gain(self.volume), self.token, self.completions.clone())
            .await
        {
            Ok(()) => {
                self.active = Some(self.token);
                self.watchdog.playing(Instant::now());
                debug!("▶️ Guild {}: pista {} con sesión {}", self.guild_id, index + 1, self.token);
                Ok(self.token)
            }
            Err(e) => {
                self.watchdog.idle();
                Err(e)
            }
        }
    }

    /// Avanza según la política de cola: respeta loop y shuffle.
    ///
    /// Devuelve `None` si la sesión quedó detenida o no hubo movimiento.
    pub async fn advance(&mut self, direction: Direction) -> PlaybackResult<Option<SessionToken>> {
        self.advance_with(direction, true).await
    }

    /// Salto explícito: ignora el loop de pista
    pub async fn skip(&mut self) -> PlaybackResult<Option<SessionToken>> {
        self.advance_with(Direction::Forward, false).await
    }

    async fn advance_with(
        &mut self,
        direction: Direction,
        honor_loop: bool,
    ) -> PlaybackResult<Option<SessionToken>> {
        if self.queue.is_empty() {
            return Err(PlaybackError::EmptyQueue);
        }

        let mut step = self.next_step(direction, honor_loop);
        let mut failures = 0usize;

        loop {
            let index = match step {
                Step::Play(index) => index,
                Step::Stay => return Ok(None),
                Step::Stop => {
                    self.halt().await;
                    info!("⏹️ Fin de la cola en guild {}", self.guild_id);
                    return Ok(None);
                }
            };

            match self.play_track(index).await {
                Ok(token) => return Ok(Some(token)),
                Err(err @ PlaybackError::PlaybackFailed { .. }) => {
                    warn!("⚠️ Guild {}: {}", self.guild_id, err);
                    failures += 1;
                    if failures >= self.queue.len() {
                        self.halt().await;
                        error!(
                            "❌ Guild {}: ninguna de las {} pistas se pudo reproducir, sesión detenida",
                            self.guild_id, failures
                        );
                        return Err(err);
                    }
                    self.incidents.push(err);
                    step = self.next_step(Direction::Forward, false);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn next_step(&mut self, direction: Direction, honor_loop: bool) -> Step {
        let len = self.queue.len();
        match (direction, self.cursor) {
            (Direction::Forward, Some(i)) if honor_loop && self.loop_track => Step::Play(i),
            (Direction::Forward, None) => Step::Play(0),
            (Direction::Forward, Some(i)) if i + 1 < len => Step::Play(i + 1),
            (Direction::Forward, Some(_)) if self.shuffle => {
                self.reshuffle_for_wrap();
                Step::Play(0)
            }
            (Direction::Forward, Some(_)) => Step::Stop,
            (Direction::Backward, Some(i)) => Step::Play(i.saturating_sub(1)),
            (Direction::Backward, None) => Step::Stay,
        }
    }

    /// Baraja toda la cola al dar la vuelta; la última pista nunca queda primera
    fn reshuffle_for_wrap(&mut self) {
        let last = self.cursor.and_then(|i| self.queue.get(i)).cloned();
        self.queue.shuffle(&mut self.rng);

        let len = self.queue.len();
        if len > 1 && last.as_ref() == self.queue.first() {
            let swap_with = self.rng.gen_range(1..len);
            self.queue.swap(0, swap_with);
        }
        self.cursor = None;
        info!("🔀 Cola rebarajada en guild {}", self.guild_id);
    }

    async fn halt(&mut self) {
        self.token = self.token.next();
        self.cursor = None;
        if let (Some(_), Some(voice)) = (self.active.take(), self.voice) {
            self.engine.stop(&voice).await;
        }
        self.watchdog.idle();
    }

    /// Parada manual: invalida cualquier notificación en vuelo.
    ///
    /// La cola y el cursor se conservan.
    pub async fn stop_manually(&mut self) {
        self.suppressed = true;
        self.token = self.token.next();
        if let (Some(_), Some(voice)) = (self.active.take(), self.voice) {
            self.engine.stop(&voice).await;
        }
        self.watchdog.idle();
        self.suppressed = false;
        debug!("⏹️ Parada manual en guild {} (sesión {})", self.guild_id, self.token);
    }

    /// Punto de entrada del motor cuando termina una pista
    pub async fn on_track_finished(&mut self, token_at_start: SessionToken) -> PlaybackResult<Delivery> {
        if token_at_start != self.token || self.suppressed {
            debug!(
                "Notificación obsoleta en guild {}: {} (actual {})",
                self.guild_id, token_at_start, self.token
            );
            return Ok(Delivery::Stale);
        }

        self.active = None;
        self.advance(Direction::Forward).await?;
        Ok(Delivery::Applied)
    }

    pub fn on_progress(&mut self, token: SessionToken) -> Delivery {
        if self.active != Some(token) || self.token != token {
            return Delivery::Stale;
        }
        self.watchdog.progress(Instant::now());
        Delivery::Applied
    }

    /// Si la reproducción lleva más de `timeout` sin progreso, fuerza un salto
    pub async fn recover_if_hung(&mut self, timeout: Duration) -> Option<PlaybackError> {
        let stalled_for = self.watchdog.stalled_for(Instant::now(), timeout)?;
        let incident = PlaybackError::Hang { stalled_for };
        error!("🧊 Guild {}: {} (sesión {})", self.guild_id, incident, self.token);

        self.stop_manually().await;
        if let Err(e) = self.skip().await {
            warn!("Guild {}: no se pudo saltar tras el bloqueo: {}", self.guild_id, e);
        }
        Some(incident)
    }

    /// Pausa la pista en curso; `false` si ya estaba pausada
    pub async fn pause(&mut self) -> PlaybackResult<bool> {
        let voice = self.voice.ok_or(PlaybackError::NotConnected)?;
        match self.watchdog.expected() {
            ExpectedState::Paused => Ok(false),
            ExpectedState::Idle => Err(PlaybackError::NothingPlaying),
            ExpectedState::Playing => {
                self.engine.pause(&voice).await?;
                self.watchdog.paused();
                info!("⏸️ Pausa en guild {} (sesión {})", self.guild_id, self.token);
                Ok(true)
            }
        }
    }

    /// Reanuda una pista pausada; `false` si no había pausa
    pub async fn resume(&mut self) -> PlaybackResult<bool> {
        if self.watchdog.expected() != ExpectedState::Paused {
            return Ok(false);
        }
        let voice = self.voice.ok_or(PlaybackError::NotConnected)?;

        self.engine.resume(&voice).await?;
        self.watchdog.playing(Instant::now());
        info!("▶️ Reanudado en guild {} (sesión {})", self.guild_id, self.token);
        Ok(true)
    }

    /// Fija el volumen en porcentaje; se aplica en caliente y a las pistas siguientes
    pub async fn set_volume(&mut self, percent: u8) {
        self.volume = percent;
        if let (Some(_), Some(voice)) = (self.active, self.voice) {
            if let Err(e) = self.engine.set_volume(&voice, gain(percent)).await {
                warn!("Guild {}: volumen no aplicado a la pista actual: {}", self.guild_id, e);
            }
        }
        debug!("🔊 Guild {}: volumen {}%", self.guild_id, percent);
    }

    /// Activa o desactiva shuffle; devuelve el nuevo estado
    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;

        if self.shuffle {
            let start = self.cursor.map_or(0, |c| c + 1).min(self.queue.len());
            self.queue[start..].shuffle(&mut self.rng);
        } else {
            let current = self.cursor.and_then(|i| self.queue.get(i)).cloned();
            self.queue = self.library_order.clone();
            self.cursor = current.and_then(|t| self.queue.iter().position(|q| *q == t));
        }

        info!("🔀 Shuffle {} en guild {}", on_off(self.shuffle), self.guild_id);
        self.shuffle
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.loop_track = !self.loop_track;
        info!("🔂 Loop {} en guild {}", on_off(self.loop_track), self.guild_id);
        self.loop_track
    }

    /// Reemplaza la cola por una playlist nueva; detiene lo que suene
    pub async fn load_playlist(&mut self, name: Option<String>, tracks: Vec<Track>) -> usize {
        self.stop_manually().await;
        self.library_order = tracks.clone();
        self.queue = tracks;
        self.cursor = None;
        self.playlist = name;

        if self.shuffle {
            self.queue.shuffle(&mut self.rng);
        }

        info!(
            "📂 Guild {}: playlist {} con {} pistas",
            self.guild_id,
            self.playlist.as_deref().unwrap_or("principal"),
            self.queue.len()
        );
        self.queue.len()
    }

    pub fn attach_voice(&mut self, voice: VoiceHandle) {
        self.voice = Some(voice);
    }

    /// Suelta la conexión de voz deteniendo la reproducción
    pub async fn detach_voice(&mut self) -> Option<VoiceHandle> {
        self.stop_manually().await;
        self.voice.take()
    }

    /// Sale y vuelve a entrar al mismo canal; la cola y el cursor no cambian
    pub async fn reconnect(&mut self) -> PlaybackResult<()> {
        let voice = self.voice.ok_or(PlaybackError::NotConnected)?;
        let was_playing = self.active.is_some();
        let was_paused = self.is_paused();

        self.stop_manually().await;
        if let Err(e) = self.transport.leave(&voice).await {
            warn!("Guild {}: error al salir antes de reconectar: {}", self.guild_id, e);
        }

        match self.transport.join(voice.guild_id, voice.channel_id).await {
            Ok(handle) => self.voice = Some(handle),
            Err(e) => {
                self.voice = None;
                return Err(e);
            }
        }
        info!("🔄 Guild {} reconectado al canal {}", self.guild_id, voice.channel_id);

        if let (true, Some(index)) = (was_playing, self.cursor) {
            self.play_track(index).await?;
            if was_paused {
                self.pause().await?;
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let current = self.active.and(self.cursor).and_then(|i| self.queue.get(i));
        SessionSnapshot {
            now_playing: current.map(|t| t.title().to_string()),
            now_playing_length: current.and_then(Track::duration_hint),
            position: self.cursor,
            queue: self.queue.iter().map(|t| t.title().to_string()).collect(),
            playlist: self.playlist.clone(),
            shuffle: self.shuffle,
            loop_track: self.loop_track,
            playing: self.active.is_some(),
            paused: self.is_paused(),
            volume: self.volume,
            connected: self.voice.is_some(),
            token: self.token,
        }
    }

    /// Fallos de reproducción acumulados desde la última respuesta
    pub fn take_incidents(&mut self) -> Vec<PlaybackError> {
        std::mem::take(&mut self.incidents)
    }

    // Getters
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }
    #[cfg(test)]
    pub fn token(&self) -> SessionToken {
        self.token
    }
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
    pub fn voice(&self) -> Option<VoiceHandle> {
        self.voice
    }
    pub fn playlist(&self) -> Option<&str> {
        self.playlist.as_deref()
    }
    pub fn is_playing(&self) -> bool {
        self.watchdog.expected() == ExpectedState::Playing
    }
    pub fn is_paused(&self) -> bool {
        self.watchdog.expected() == ExpectedState::Paused
    }
}

fn gain(percent: u8) -> f32 {
    f32::from(percent) / 100.0
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "activado"
    } else {
        "desactivado"
    }
}
