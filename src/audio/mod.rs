//! # Audio Module
//!
//! Per-guild playback for locally stored audio files.
//!
//! ## Architecture
//!
//! ### [`session`] - Playback Session
//! - Owns the queue, cursor, shuffle/loop flags and the voice handle of one guild
//! - Tags every playback with a monotonically increasing [`session::SessionToken`]
//! - Ignores engine notifications whose token is no longer current
//!
//! ### [`engine`] - Audio Engine Bridge
//! - Starts and stops tracks on the Songbird driver
//! - Track end, track error and periodic progress events are forwarded as jobs
//!   to the guild worker through a [`engine::CompletionSender`]; handlers never
//!   touch session state
//!
//! ### [`transport`] - Voice Transport
//! - Join/leave voice channels and sample connection latency
//!
//! ### [`track`] - Local Catalog
//! - Reads the music directory; every sub-directory is a playlist
//! - Files sort by their leading number ("01 - Title.opus")
//!
//! ## Late notifications
//!
//! Songbird fires `TrackEvent::End` for tracks that are stopped, not only for
//! tracks that run to completion. Every skip, stop or replay therefore produces
//! a completion stamped with the previous token, delivered after the command
//! that caused it. The token check in
//! [`session::PlaybackSession::on_track_finished`] turns those into no-ops.

pub mod engine;
pub mod session;
#[cfg(test)]
pub mod testing;
pub mod track;
pub mod transport;
