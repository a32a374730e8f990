//! Server configuration and command-line arguments.
//!
//! Defaults live in [`ServerConfig::default`]; CLI values override them via
//! [`ServerConfig::apply_cli_overrides`].

use std::time::Duration;

use clap::Parser;

/// Default number of concurrent game slots.
pub const G_MAX: usize = 10;

/// Seats per game. Structural: the protocol pairs exactly two players.
pub const SEAT_MAX_PER_SESSION: usize = 2;

/// Consecutive provisioning failures before a seat is dropped.
pub const MAX_FLAG_RETRIES: u8 = 5;

/// Pause between accept-loop iterations.
pub const ACCEPT_IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Handler tick: the bound on how long stop/shutdown can go unobserved.
pub const HANDLER_TIMER: Duration = Duration::from_secs(1);

/// How long shutdown waits for handlers to exit before giving up.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime configuration for the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to bind on 0.0.0.0.
    pub port: u16,
    /// Number of game slots.
    pub max_games: usize,
    /// Consecutive provisioning failures tolerated per seat.
    pub max_flag_retries: u8,
    /// Accept-loop pacing.
    pub accept_idle: Duration,
    /// Handler tick interval.
    pub handler_timer: Duration,
    /// Shutdown drain bound.
    pub drain_timeout: Duration,
    /// Default log filter when RUST_LOG is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            max_games: G_MAX,
            max_flag_retries: MAX_FLAG_RETRIES,
            accept_idle: ACCEPT_IDLE_SLEEP,
            handler_timer: HANDLER_TIMER,
            drain_timeout: DRAIN_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}

/// Flagduel server command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "flagduel-server", about = "Two-player flag duel server")]
pub struct CliArgs {
    /// Port to listen on.
    pub port: u16,

    /// Maximum number of concurrent games.
    #[arg(long)]
    pub max_games: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl ServerConfig {
    /// Apply CLI overrides to a config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        self.port = args.port;
        if let Some(max_games) = args.max_games {
            self.max_games = max_games;
        }
        if let Some(ref level) = args.log_level {
            self.log_level = level.clone();
        }
    }
}
