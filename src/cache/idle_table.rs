use dashmap::DashMap;
use std::{hash::Hash, time::Duration};
use tokio::time::Instant;
use tracing::debug;

/// Entrada con marca del último acceso
#[derive(Debug)]
struct IdleEntry<V> {
    value: V,
    touched_at: Instant,
}

/// Tabla por clave creada bajo demanda y purgada por inactividad.
///
/// Cada subsistema tiene la suya; no hay estado compartido entre tablas.
#[derive(Debug)]
pub struct IdleTable<K: Eq + Hash, V> {
    data: DashMap<K, IdleEntry<V>>,
}

impl<K, V> IdleTable<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Default + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Ejecuta `f` sobre la entrada de `key`, creándola si no existe
    pub fn with<R>(&self, key: K, now: Instant, f: impl FnOnce(&mut V) -> R) -> R {
        let mut entry = self.data.entry(key).or_insert_with(|| IdleEntry {
            value: V::default(),
            touched_at: now,
        });
        entry.touched_at = now;
        f(&mut entry.value)
    }

    /// Lectura sin crear ni refrescar la entrada
    #[cfg(test)]
    pub fn peek<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.data.get(key).map(|entry| f(&entry.value))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Elimina las entradas sin acceso desde hace más de `idle_for`
    pub fn evict_idle(&self, now: Instant, idle_for: Duration) -> usize {
        let before = self.data.len();
        self.data
            .retain(|_, entry| now.saturating_duration_since(entry.touched_at) <= idle_for);
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            debug!("Eliminadas {} entradas inactivas", removed);
        }
        removed
    }
}

impl<K, V> Default for IdleTable<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_lazy_creation_and_idle_eviction() {
        let table: IdleTable<u64, u32> = IdleTable::new();
        assert_eq!(table.peek(&1, |v| *v), None);

        table.with(1, Instant::now(), |v| *v += 1);
        table.with(2, Instant::now(), |v| *v += 5);
        tokio::time::advance(Duration::from_secs(40)).await;
        table.with(1, Instant::now(), |v| *v += 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(table.evict_idle(Instant::now(), Duration::from_secs(60)), 1);

        assert_eq!(table.peek(&1, |v| *v), Some(2));
        assert_eq!(table.peek(&2, |v| *v), None);
        assert_eq!(table.len(), 1);
    }
}
