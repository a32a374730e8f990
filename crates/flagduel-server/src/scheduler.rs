//! Accept loop, game slot table, capacity cap, and the reaper.
//!
//! The scheduler owns a fixed table of game slots. A new connection is
//! seated into a half-filled game when one exists, otherwise into a fresh
//! game in an empty slot; past the handler cap it receives a single
//! capacity notice and is closed. The reaper runs on every loop iteration
//! and clears slots whose game is stopped with no seats left — dropping the
//! last reference closes the game's stop channel.
//!
//! Lock discipline: the slot table lock is the outermost and is held only
//! around inspect/mutate, never across I/O. Game-internal locks nest under
//! it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flagduel_protocol::CommandPolicy;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::game::{Game, SeatId, SeatWriter};
use crate::handler::SeatHandler;
use crate::messages;
use crate::platform::{SocketConfig, configure_stream};

/// How often the drain loop re-checks the live handler count.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// The multi-game scheduler.
pub struct Scheduler {
    config: ServerConfig,
    socket_config: SocketConfig,
    policy: Arc<CommandPolicy>,
    slots: Mutex<Vec<Option<Arc<Game>>>>,
    live: Arc<AtomicUsize>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    /// Build a scheduler with `config.max_games` empty slots.
    pub fn new(config: ServerConfig, shutdown: watch::Receiver<bool>) -> Arc<Scheduler> {
        let slots = (0..config.max_games).map(|_| None).collect();
        Arc::new(Scheduler {
            socket_config: SocketConfig::default(),
            policy: Arc::new(CommandPolicy::default()),
            slots: Mutex::new(slots),
            live: Arc::new(AtomicUsize::new(0)),
            shutdown,
            config,
        })
    }

    /// Handlers currently running. Equals the sum of seat counts across all
    /// active games.
    pub fn live_handlers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Occupied game slots.
    pub fn active_games(&self) -> usize {
        self.lock_slots().iter().flatten().count()
    }

    /// Accept connections until the shutdown flag is raised, then drain.
    pub async fn run(&self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, max_games = self.config.max_games, "server listening");

        let mut shutdown = self.shutdown.clone();
        loop {
            self.reap();
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "accepted connection");
                            self.admit(stream);
                        }
                        Err(e) => {
                            // Transient accept failures must not take the
                            // other games down with them.
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                    tokio::time::sleep(self.config.accept_idle).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("shutdown flag raised, closing accept loop");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.accept_idle) => {}
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Seat a connection or turn it away at capacity.
    fn admit(&self, stream: TcpStream) {
        if let Err(e) = configure_stream(&stream, &self.socket_config) {
            tracing::debug!(error = %e, "socket configuration failed");
        }

        if self.live_handlers() >= self.config.max_games * crate::config::SEAT_MAX_PER_SESSION {
            self.turn_away(stream);
            return;
        }

        let (reader, write_half) = stream.into_split();
        let writer: SeatWriter = Arc::new(tokio::sync::Mutex::new(write_half));

        let Some((game, seat)) = self.find_seat(&writer) else {
            // Every slot holds a full or stopping game; same notice as the
            // handler cap.
            tracing::info!("no free game slot, turning connection away");
            tokio::spawn(async move {
                let _ = reader;
                let mut guard = writer.lock().await;
                let _ = flagduel_protocol::write_frame(&mut *guard, &messages::GAME_LIMIT).await;
            });
            return;
        };

        self.live.fetch_add(1, Ordering::AcqRel);
        tracing::info!(%seat, live = self.live_handlers(), "connection seated");

        let handler = SeatHandler {
            game,
            seat,
            reader,
            writer,
            shutdown: self.shutdown.clone(),
            live: self.live.clone(),
            timer: self.config.handler_timer,
        };
        tokio::spawn(handler.run());
    }

    /// Find a seat for `writer`: a half-filled game first, else a fresh game
    /// in an empty slot.
    fn find_seat(&self, writer: &SeatWriter) -> Option<(Arc<Game>, SeatId)> {
        let mut slots = self.lock_slots();

        for slot in slots.iter().flatten() {
            if slot.is_stopped() || slot.seat_count() != 1 {
                continue;
            }
            if let Some(seat) = slot.attach_second(writer.clone()) {
                return Some((slot.clone(), seat));
            }
        }

        for slot in slots.iter_mut() {
            if slot.is_none() {
                let (game, seat) = Game::with_first_seat(
                    writer.clone(),
                    self.policy.clone(),
                    self.config.max_flag_retries,
                );
                *slot = Some(game.clone());
                return Some((game, seat));
            }
        }

        None
    }

    /// Send the capacity notice and close the connection. Best effort: a
    /// client that is already gone is simply dropped.
    fn turn_away(&self, stream: TcpStream) {
        tracing::info!("at capacity, turning connection away");
        tokio::spawn(async move {
            let mut stream = stream;
            let _ = flagduel_protocol::write_frame(&mut stream, &messages::GAME_LIMIT).await;
        });
    }

    /// Clear every slot whose game is stopped with no seats left.
    fn reap(&self) {
        let mut slots = self.lock_slots();
        for slot in slots.iter_mut() {
            let done = slot
                .as_ref()
                .is_some_and(|game| game.is_stopped() && game.seat_count() == 0);
            if done {
                *slot = None;
                tracing::debug!("reclaimed game slot");
            }
        }
    }

    /// Wait for every handler to exit, bounded by the drain timeout, then
    /// reap whatever remains.
    async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        while self.live_handlers() > 0 {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    live = self.live_handlers(),
                    "drain timeout expired with handlers still running"
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        self.reap();
        tracing::info!("drained, server stopped");
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Vec<Option<Arc<Game>>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}
