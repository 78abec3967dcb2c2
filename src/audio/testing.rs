//! Dobles de prueba para el motor, el transporte de voz y el catálogo.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use crate::{
    audio::{
        engine::{AudioEngine, CompletionSender},
        session::SessionToken,
        track::{Catalog, Track},
        transport::{VoiceHandle, VoiceTransport},
    },
    error::{PlaybackError, PlaybackResult},
};

/// Pistas con prefijo numérico cuyo título es exactamente `titles[i]`
pub fn tracks(titles: &[&str]) -> Vec<Track> {
    titles
        .iter()
        .enumerate()
        .map(|(i, title)| Track::new(format!("/music/{:02} - {}.opus", i + 1, title)))
        .collect()
}

/// Deja correr las tareas pendientes del runtime de test
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Motor falso.
///
/// Igual que Songbird, `stop` provoca un fin de pista tardío con el token de la
/// pista detenida; llega por el canal después de que el comando terminó.
pub struct FakeEngine {
    starts: Mutex<Vec<(String, SessionToken)>>,
    failing: Mutex<HashSet<String>>,
    start_delay: Mutex<Option<Duration>>,
    current: Mutex<Option<(SessionToken, CompletionSender)>>,
    paused: Mutex<bool>,
    volumes: Mutex<Vec<f32>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            starts: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            start_delay: Mutex::new(None),
            current: Mutex::new(None),
            paused: Mutex::new(false),
            volumes: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_on(&self, title: &str) {
        self.failing.lock().insert(title.to_string());
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock() = Some(delay);
    }

    pub fn started_titles(&self) -> Vec<String> {
        self.starts.lock().iter().map(|(title, _)| title.clone()).collect()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Ganancias aplicadas, al iniciar pistas o en caliente
    pub fn volumes(&self) -> Vec<f32> {
        self.volumes.lock().clone()
    }

    /// Simula el fin natural de la pista actual
    pub async fn finish_current(&self) {
        let current = self.current.lock().take();
        if let Some((token, completions)) = current {
            completions.finished(token).await;
        }
    }
}

#[async_trait]
impl AudioEngine for FakeEngine {
    async fn start(
        &self,
        _voice: &VoiceHandle,
        track: &Track,
        volume: f32,
        token: SessionToken,
        completions: CompletionSender,
    ) -> PlaybackResult<()> {
        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().contains(track.title()) {
            return Err(PlaybackError::PlaybackFailed {
                title: track.title().to_string(),
                reason: "archivo corrupto".to_string(),
            });
        }

        self.starts.lock().push((track.title().to_string(), token));
        self.volumes.lock().push(volume);
        *self.current.lock() = Some((token, completions));
        *self.paused.lock() = false;
        Ok(())
    }

    async fn stop(&self, _voice: &VoiceHandle) {
        *self.paused.lock() = false;
        let current = self.current.lock().take();
        if let Some((token, completions)) = current {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                completions.finished(token).await;
            });
        }
    }

    async fn pause(&self, _voice: &VoiceHandle) -> PlaybackResult<()> {
        if self.current.lock().is_none() {
            return Err(PlaybackError::NothingPlaying);
        }
        *self.paused.lock() = true;
        Ok(())
    }

    async fn resume(&self, _voice: &VoiceHandle) -> PlaybackResult<()> {
        if self.current.lock().is_none() {
            return Err(PlaybackError::NothingPlaying);
        }
        *self.paused.lock() = false;
        Ok(())
    }

    async fn set_volume(&self, _voice: &VoiceHandle, volume: f32) -> PlaybackResult<()> {
        if self.current.lock().is_none() {
            return Err(PlaybackError::NothingPlaying);
        }
        self.volumes.lock().push(volume);
        Ok(())
    }
}

/// Transporte falso con latencias programadas
pub struct FakeTransport {
    latencies: Mutex<Vec<Option<Duration>>>,
    joins: Mutex<usize>,
    leaves: Mutex<usize>,
    connected: Mutex<bool>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            latencies: Mutex::new(Vec::new()),
            joins: Mutex::new(0),
            leaves: Mutex::new(0),
            connected: Mutex::new(true),
        }
    }

    /// Las muestras se entregan en orden; la última se repite
    pub fn script_latencies(&self, samples: Vec<Option<Duration>>) {
        *self.latencies.lock() = samples.into_iter().rev().collect();
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.lock() = connected;
    }

    pub fn joins(&self) -> usize {
        *self.joins.lock()
    }

    pub fn leaves(&self) -> usize {
        *self.leaves.lock()
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> PlaybackResult<VoiceHandle> {
        *self.joins.lock() += 1;
        *self.connected.lock() = true;
        Ok(VoiceHandle { guild_id, channel_id })
    }

    async fn leave(&self, _voice: &VoiceHandle) -> PlaybackResult<()> {
        *self.leaves.lock() += 1;
        *self.connected.lock() = false;
        Ok(())
    }

    async fn sample_latency(&self, _voice: &VoiceHandle) -> Option<Duration> {
        let mut latencies = self.latencies.lock();
        if latencies.len() > 1 {
            latencies.pop().flatten()
        } else {
            latencies.last().copied().flatten()
        }
    }

    async fn is_connected(&self, _voice: &VoiceHandle) -> bool {
        *self.connected.lock()
    }
}

/// Catálogo en memoria: biblioteca principal más playlists con nombre
pub struct StaticCatalog {
    library: Vec<Track>,
    playlists: HashMap<String, Vec<Track>>,
}

impl StaticCatalog {
    pub fn new(library: &[&str]) -> Self {
        Self {
            library: tracks(library),
            playlists: HashMap::new(),
        }
    }

    pub fn with_playlist(mut self, name: &str, titles: &[&str]) -> Self {
        self.playlists.insert(name.to_string(), tracks(titles));
        self
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn load(&self, playlist: Option<&str>) -> Result<Vec<Track>> {
        match playlist {
            None => Ok(self.library.clone()),
            Some(name) => self
                .playlists
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("La playlist '{}' no existe", name)),
        }
    }

    async fn playlists(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.playlists.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
