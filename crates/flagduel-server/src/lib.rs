//! Flagduel server: the session fabric for two-player flag duels.
//!
//! The [`scheduler`] pairs incoming connections into [`game`]s, each driven
//! by two [`handler`] tasks. A game provisions a secret flag for each seat,
//! relays policy-screened shell commands between the pair, and stops when
//! one seat submits the opponent's token, a seat departs, or the server
//! shuts down ([`shutdown`]).

#![deny(unsafe_code)]

pub mod config;
pub mod game;
pub mod handler;
pub mod logging;
pub mod messages;
pub mod platform;
pub mod scheduler;
pub mod shutdown;

pub use config::ServerConfig;
pub use scheduler::Scheduler;
