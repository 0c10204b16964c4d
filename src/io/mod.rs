//! Operating-system event sources feeding the scheduler's trigger channel.

pub mod signals; // Unix signal handling
pub mod time_change; // Wall-clock steps and timezone file changes
