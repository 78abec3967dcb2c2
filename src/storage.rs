use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{collections::HashMap, io::Write, path::PathBuf};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

/// Punteros durables de un guild: dónde estaba y qué sonaba
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildPointers {
    pub guild_id: u64,
    pub last_text_channel: Option<u64>,
    pub last_voice_channel: Option<u64>,
    pub last_playlist: Option<String>,
    /// Volumen elegido con /volume, en porcentaje
    pub volume: Option<u8>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Almacén de punteros basado en archivos JSON.
///
/// Se lee del disco una sola vez al abrir; después todas las lecturas salen
/// de la caché. Cada escritura actualiza la caché primero y luego reemplaza el
/// archivo de forma atómica (temporal + rename).
pub struct PointerStore {
    data_dir: PathBuf,
    cache: RwLock<HashMap<u64, GuildPointers>>,
    /// Serializa las escrituras a disco
    write_lock: Mutex<()>,
}

impl PointerStore {
    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        let guilds_dir = data_dir.join("guilds");
        fs::create_dir_all(&guilds_dir).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let store = Self {
            data_dir,
            cache: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        };

        // Cargar punteros existentes
        store.load_all().await?;

        Ok(store)
    }

    /// Punteros de un guild (valores por defecto si no hay nada guardado)
    pub fn get(&self, guild_id: GuildId) -> GuildPointers {
        self.cache
            .read()
            .get(&guild_id.get())
            .cloned()
            .unwrap_or_else(|| GuildPointers {
                guild_id: guild_id.get(),
                ..GuildPointers::default()
            })
    }

    /// Reemplaza los punteros de un guild
    pub async fn set(&self, guild_id: GuildId, mut pointers: GuildPointers) -> Result<()> {
        pointers.guild_id = guild_id.get();
        pointers.updated_at = Some(Utc::now());

        // Caché primero: la lectura nunca espera al disco
        self.cache.write().insert(guild_id.get(), pointers.clone());

        self.persist(&pointers).await?;
        debug!("💾 Punteros guardados para guild {}", guild_id);
        Ok(())
    }

    /// Lee, modifica y guarda en un solo paso
    pub async fn update(&self, guild_id: GuildId, f: impl FnOnce(&mut GuildPointers)) -> Result<()> {
        let mut pointers = self.get(guild_id);
        f(&mut pointers);
        self.set(guild_id, pointers).await
    }

    /// Guilds que seguían conectados a voz la última vez
    pub fn guilds_with_voice(&self) -> Vec<GuildId> {
        self.cache
            .read()
            .values()
            .filter(|p| p.last_voice_channel.is_some() && p.guild_id != 0)
            .map(|p| GuildId::new(p.guild_id))
            .collect()
    }

    /// Obtiene estadísticas de almacenamiento
    pub async fn stats(&self) -> Result<StorageStats> {
        let mut files = fs::read_dir(self.guilds_dir()).await?;
        let mut file_count = 0;
        let mut total_size = 0;

        while let Some(entry) = files.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                file_count += 1;
                if let Ok(metadata) = entry.metadata().await {
                    total_size += metadata.len();
                }
            }
        }

        Ok(StorageStats {
            guild_files: file_count,
            cached_guilds: self.cache.read().len(),
            total_size_bytes: total_size,
            data_dir: self.data_dir.clone(),
        })
    }

    // Métodos privados

    async fn persist(&self, pointers: &GuildPointers) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let dir = self.guilds_dir();
        let path = self.guild_file_path(pointers.guild_id);
        let content = serde_json::to_vec_pretty(pointers)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&content)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path)
                .with_context(|| format!("no se pudo reemplazar {}", path.display()))?;
            Ok(())
        })
        .await??;

        Ok(())
    }

    async fn load_all(&self) -> Result<()> {
        let mut files = fs::read_dir(self.guilds_dir()).await?;
        let mut loaded = HashMap::new();

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }

            let Some(guild_id) = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                continue;
            };

            let parsed = match fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<GuildPointers>(&bytes).map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            };
            match parsed {
                Ok(mut pointers) => {
                    pointers.guild_id = guild_id;
                    loaded.insert(guild_id, pointers);
                }
                Err(e) => {
                    let backup = path.with_extension("json.bak");
                    warn!(
                        "Punteros corruptos para guild {} ({}), respaldo en {}",
                        guild_id,
                        e,
                        backup.display()
                    );
                    fs::rename(&path, &backup).await?;
                }
            }
        }

        if !loaded.is_empty() {
            info!("📂 Cargados punteros de {} guilds", loaded.len());
        }
        *self.cache.write() = loaded;

        Ok(())
    }

    fn guilds_dir(&self) -> PathBuf {
        self.data_dir.join("guilds")
    }

    fn guild_file_path(&self, guild_id: u64) -> PathBuf {
        self.guilds_dir().join(format!("guild_{}.json", guild_id))
    }
}

/// Estadísticas de almacenamiento
#[derive(Debug)]
pub struct StorageStats {
    pub guild_files: usize,
    pub cached_guilds: usize,
    pub total_size_bytes: u64,
    pub data_dir: PathBuf,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📊 Storage Stats:\n\
             📁 Data Directory: {}\n\
             📝 Guild Files: {} files\n\
             💾 Cached Guilds: {} in memory\n\
             📦 Total Size: {} bytes ({:.2} KB)",
            self.data_dir.display(),
            self.guild_files,
            self.cached_guilds,
            self.total_size_bytes,
            self.total_size_bytes as f64 / 1024.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn guild() -> GuildId {
        GuildId::new(77)
    }

    #[tokio::test]
    async fn test_set_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = PointerStore::open(dir.path().to_path_buf()).await.unwrap();

        store
            .update(guild(), |p| {
                p.last_playlist = Some("jazz".to_string());
                p.last_voice_channel = Some(5);
            })
            .await
            .unwrap();

        let reopened = PointerStore::open(dir.path().to_path_buf()).await.unwrap();
        let pointers = reopened.get(guild());
        assert_eq!(pointers.last_playlist.as_deref(), Some("jazz"));
        assert_eq!(pointers.last_voice_channel, Some(5));
        assert_eq!(reopened.guilds_with_voice(), vec![guild()]);
    }

    #[tokio::test]
    async fn test_reads_come_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = PointerStore::open(dir.path().to_path_buf()).await.unwrap();

        store
            .update(guild(), |p| p.last_text_channel = Some(9))
            .await
            .unwrap();
        std::fs::remove_file(dir.path().join("guilds").join("guild_77.json")).unwrap();

        assert_eq!(store.get(guild()).last_text_channel, Some(9));
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = PointerStore::open(dir.path().to_path_buf()).await.unwrap();

        for i in 0..5 {
            store
                .update(guild(), |p| p.last_text_channel = Some(i))
                .await
                .unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(dir.path().join("guilds"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["guild_77.json".to_string()]);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.guild_files, 1);
        assert_eq!(stats.cached_guilds, 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let guilds = dir.path().join("guilds");
        std::fs::create_dir_all(&guilds).unwrap();
        std::fs::write(guilds.join("guild_77.json"), b"{ no es json").unwrap();

        let store = PointerStore::open(dir.path().to_path_buf()).await.unwrap();

        assert_eq!(store.get(guild()).last_playlist, None);
        assert!(guilds.join("guild_77.json.bak").exists());
        assert!(!guilds.join("guild_77.json").exists());
    }

    #[tokio::test]
    async fn test_unreadable_bytes_are_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let guilds = dir.path().join("guilds");
        std::fs::create_dir_all(&guilds).unwrap();
        std::fs::write(guilds.join("guild_77.json"), [0xff, 0xfe, 0x00, 0x7b]).unwrap();

        let store = PointerStore::open(dir.path().to_path_buf()).await.unwrap();

        assert_eq!(store.get(guild()), GuildPointers { guild_id: 77, ..GuildPointers::default() });
        assert!(guilds.join("guild_77.json.bak").exists());
        assert!(store.guilds_with_voice().is_empty());
    }
}
