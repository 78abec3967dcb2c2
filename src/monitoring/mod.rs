//! # Monitoring Module
//!
//! Background supervision of live guild sessions.
//!
//! ### [`health`] - Connection Health Monitor
//! One sampling task per connected guild. Latency samples drive a small state
//! machine (`Normal → Suspicious → PostReconnect → Recovering → Normal`); when
//! a run of bad samples crosses the limit, the task asks the guild worker for a
//! reconnect. A cooldown keeps forced reconnects at least
//! `HEALTH_RECONNECT_COOLDOWN` apart regardless of state, and the sampling
//! interval adapts to the current state.
//!
//! ### [`watchdog`] - Hang Watchdog
//! A single timer that asks every live guild worker to check for a session
//! stuck in `Playing` without progress. The worker forces one skip per stall.
//! A paused session is never considered stuck.
//!
//! ### [`presence`] - Alone Tracker
//! Per-worker timer for an empty voice channel: auto-pause after
//! `ALONE_PAUSE_DELAY`, auto-resume when a listener comes back, and leave
//! after `ALONE_DISCONNECT_DELAY`.

pub mod health;
pub mod presence;
pub mod watchdog;

pub use health::HealthMonitor;
pub use watchdog::run_watchdog;
