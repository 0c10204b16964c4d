//! # twilightr
//!
//! Tracks whether it is currently day or night at the device's location and
//! tells interested listeners when that changes.
//!
//! ## Architecture
//!
//! - **Entry Point**: [`Twilightr`] wires the daemon together and runs it
//! - **Scheduler**: [`scheduler::UpdateScheduler`] turns triggers into
//!   evaluations, publications and wake-ups
//! - **Twilight**: [`twilight`] computes sunrise/sunset windows
//! - **Collaborators**: [`location`], [`alarm`], [`settings`] and
//!   [`time_source`] behind small traits, so tests can substitute them
//! - **Delivery**: [`listeners`] runs listener callbacks on their own threads
//! - **Configuration**: [`config`] for TOML settings with `geo.toml` override
//! - **Infrastructure**: signal handling, clock and timezone monitoring, logging

// Import macros from logger module for use in all submodules
#[macro_use]
pub mod logger;

pub mod alarm;
pub mod args;
pub mod commands;
pub mod config;
pub mod constants;
pub mod io;
pub mod listeners;
pub mod location;
pub mod scheduler;
pub mod settings;
pub mod time_source;
pub mod twilight;
mod twilightr;

#[cfg(any(test, feature = "testing-support"))]
pub mod testing;

pub use self::twilightr::{LogListener, Twilightr};
