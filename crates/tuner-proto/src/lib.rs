//! Shared types for the tuner daemon and its clients: the wire protocol,
//! configuration, platform paths, the published playback state and the
//! station/settings stores.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod state;
pub mod stations;
pub mod store;
