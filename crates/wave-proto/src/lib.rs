//! Types shared between the player engine and its front-ends: the observable
//! player snapshot, lifecycle events, control commands, configuration and
//! platform paths.

pub mod config;
pub mod platform;
pub mod protocol;
