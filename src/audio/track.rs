use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};
use symphonia::core::{
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
    units::TimeBase,
};
use tokio::fs;
use tracing::{debug, info, warn};

static NUMBER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\s*-\s*").expect("regex de prefijo válida"));
static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)").expect("regex de número válida"));

const AUDIO_EXTENSIONS: &[&str] = &["opus", "ogg", "mp3", "flac", "wav", "m4a"];

/// Pista local inmutable.
///
/// Cada sesión guarda su propia copia en la cola; nunca se comparte entre guilds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    path: PathBuf,
    display_title: String,
    duration_hint: Option<Duration>,
}

impl Track {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_title = display_title_for(&path);
        Self {
            path,
            display_title,
            duration_hint: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_hint = Some(duration);
        self
    }

    // Getters
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn title(&self) -> &str {
        &self.display_title
    }
    pub fn duration_hint(&self) -> Option<Duration> {
        self.duration_hint
    }
}

/// "01 - Hopes and Dreams.opus" -> "Hopes and Dreams"
fn display_title_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Pista sin nombre");
    let title = NUMBER_PREFIX.replace(stem, "");
    if title.trim().is_empty() {
        stem.to_string()
    } else {
        title.into_owned()
    }
}

/// Duración según las cabeceras del contenedor; `None` si no se puede determinar
fn header_duration(path: &Path) -> Option<Duration> {
    let file = std::fs::File::open(path).ok()?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
        .ok()?;
    let params = &probed.format.default_track()?.codec_params;
    let frames = params.n_frames?;
    let time_base = params
        .time_base
        .or_else(|| params.sample_rate.map(|rate| TimeBase::new(1, rate)))?;

    let time = time_base.calc_time(frames);
    Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
}

fn sort_key(path: &Path) -> (u64, String) {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let number = LEADING_NUMBER
        .captures(&name)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(u64::MAX);
    (number, name.to_lowercase())
}

/// Proveedor de pistas para la playlist activa de un guild (solo lectura)
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Carga las pistas de una playlist; `None` es la biblioteca raíz
    async fn load(&self, playlist: Option<&str>) -> Result<Vec<Track>>;

    /// Nombres de las playlists disponibles
    async fn playlists(&self) -> Result<Vec<String>>;
}

/// Catálogo basado en un directorio: cada subdirectorio es una playlist
pub struct DirectoryCatalog {
    root: PathBuf,
}

impl DirectoryCatalog {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    async fn scan(&self, dir: &Path) -> Result<Vec<Track>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_audio = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false);

            if is_audio && entry.file_type().await?.is_file() {
                if LEADING_NUMBER.find(&entry.file_name().to_string_lossy()).is_none() {
                    debug!("Archivo sin prefijo numérico, irá al final: {}", path.display());
                }
                files.push(path);
            }
        }

        files.sort_by_key(|p| sort_key(p));

        // Leer cabeceras es I/O bloqueante
        let tracks = tokio::task::spawn_blocking(move || {
            files
                .into_iter()
                .map(|path| match header_duration(&path) {
                    Some(duration) => Track::new(path).with_duration(duration),
                    None => Track::new(path),
                })
                .collect::<Vec<_>>()
        })
        .await?;
        Ok(tracks)
    }
}

#[async_trait]
impl Catalog for DirectoryCatalog {
    async fn load(&self, playlist: Option<&str>) -> Result<Vec<Track>> {
        let dir = match playlist {
            Some(name) => {
                if !self.playlists().await?.iter().any(|p| p == name) {
                    anyhow::bail!("La playlist '{}' no existe", name);
                }
                self.root.join(name)
            }
            None => self.root.clone(),
        };

        let tracks = self.scan(&dir).await?;
        if tracks.is_empty() {
            warn!("📂 No hay pistas de audio en {}", dir.display());
        } else {
            info!("📂 {} pistas cargadas desde {}", tracks.len(), dir.display());
        }
        Ok(tracks)
    }

    async fn playlists(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if !name.starts_with('.') {
                        names.push(name.to_string());
                    }
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_title_strips_prefix_and_extension() {
        assert_eq!(Track::new("/music/01 - Hopes and Dreams.opus").title(), "Hopes and Dreams");
        assert_eq!(Track::new("/music/7-Intro.mp3").title(), "Intro");
        assert_eq!(Track::new("/music/Sin número.flac").title(), "Sin número");
        assert_eq!(Track::new("/music/42.ogg").title(), "42");
    }

    #[tokio::test]
    async fn test_directory_catalog_sorts_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["10 - Diez.opus", "2 - Dos.opus", "1 - Uno.mp3", "notas.txt", "Extra.ogg"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("jazz")).unwrap();
        std::fs::write(dir.path().join("jazz").join("01 - Blue.flac"), b"").unwrap();

        let catalog = DirectoryCatalog::new(dir.path().to_path_buf());

        let titles: Vec<String> = catalog
            .load(None)
            .await
            .unwrap()
            .iter()
            .map(|t| t.title().to_string())
            .collect();
        assert_eq!(titles, vec!["Uno", "Dos", "Diez", "Extra"]);

        assert_eq!(catalog.playlists().await.unwrap(), vec!["jazz".to_string()]);
        let jazz = catalog.load(Some("jazz")).await.unwrap();
        assert_eq!(jazz.len(), 1);
        assert_eq!(jazz[0].title(), "Blue");
    }

    #[tokio::test]
    async fn test_unknown_playlist_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = DirectoryCatalog::new(dir.path().to_path_buf());

        assert!(catalog.load(Some("../etc")).await.is_err());
        assert!(catalog.load(Some("nada")).await.is_err());
    }
}
