//! CLI command implementations.

pub mod put;
pub mod update_state;
pub mod watch;
