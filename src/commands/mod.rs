//! Command-line command handlers for twilightr.
//!
//! The daemon itself is [`crate::Twilightr`]; this module holds the
//! one-shot commands.

pub mod status;
