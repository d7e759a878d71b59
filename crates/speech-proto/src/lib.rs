//! Shared types and the playback-scheduling core of the KeoSpeech daemon.
//!
//! Everything here is free of network and audio I/O; the daemon crate wires
//! it to the remote file API and to mpv.

pub mod config;
pub mod ledger;
pub mod platform;
pub mod protocol;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod snapshot;
pub mod state;
