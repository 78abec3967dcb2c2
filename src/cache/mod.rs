//! # Cache Module
//!
//! Guild-keyed ambient state with an explicit lifecycle.
//!
//! [`IdleTable`] backs the admission-control records: entries are created on
//! first use, refreshed on every access, and evicted by the hourly maintenance
//! task once they have been idle for longer than `ADMISSION_IDLE_EVICTION`.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use tokio::time::Instant;
//!
//! let table: IdleTable<GuildId, BreakerRecord> = IdleTable::new();
//! let tripped = table.with(guild_id, Instant::now(), |record| record.admit(now, &settings));
//!
//! // Background maintenance
//! table.evict_idle(Instant::now(), Duration::from_secs(3600));
//! ```

pub mod idle_table;

pub use idle_table::IdleTable;
