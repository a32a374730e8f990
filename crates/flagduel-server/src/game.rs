//! Per-game shared state: two seats, flag provisioning, relay routing, and
//! the stop channel.
//!
//! A [`Game`] is shared by both seat handlers and the scheduler's slot
//! table. All seat mutations happen under one internal lock; the lock is
//! never held across I/O. Methods return the bytes to send and the writer
//! handles to send them through, and the caller performs the writes after
//! the lock is released. The stop channel is a `tokio::sync::watch` the
//! handlers select on alongside their sockets; it is signalled on the
//! false→true stop transition and closed when the last reference to the
//! game drops.

use std::sync::{Arc, Mutex};

use flagduel_protocol::{
    CommandPolicy, FLAG_TOKEN_LEN, Tag, Verdict, encode, generate_token, policy::FLAG_FILE_NAME,
};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::watch;

use crate::messages;

/// Writer half of one seat's socket. Writes from the seat's own handler
/// (control replies) and from the peer's handler (relays) serialize through
/// the inner lock.
pub type SeatWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

/// One of the two seats in a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatId(usize);

impl SeatId {
    /// The seat filled when a game is created.
    pub const FIRST: SeatId = SeatId(0);
    /// The seat filled when a second connection is paired in.
    pub const SECOND: SeatId = SeatId(1);

    /// The opposite seat.
    pub fn peer(self) -> SeatId {
        SeatId(1 - self.0)
    }
}

impl std::fmt::Display for SeatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "seat{}", self.0)
    }
}

/// Flag-provisioning progress of one seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagPhase {
    /// Seated, provisioning not yet opened.
    Idle,
    /// `FLG_DIR` sent; waiting for the client to offer a directory.
    AwaitDir,
    /// Flag-write command sent; waiting for the client's okay/error ack.
    AwaitCreateAck,
    /// Flag installed; the seat may play.
    Ready,
}

/// Why a game stopped. The reason decides what the surviving handler sends
/// before exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// One seat submitted the opponent's flag token.
    Win,
    /// A seat's connection ended.
    Departure,
    /// The server is shutting down.
    Shutdown,
}

/// What the handler should do with a `FLG` payload it fed to the game.
#[derive(Debug)]
pub enum FlagOutcome {
    /// Send these bytes to the seat's own socket.
    Reply(Vec<u8>),
    /// Too many consecutive provisioning failures; drop the connection.
    Disconnect,
    /// Consume the payload silently.
    Silent,
}

/// Routing decision for a gameplay frame.
#[derive(Debug)]
pub enum RouteOutcome {
    /// Sender is not ready; the frame is dropped without a reply.
    Discard,
    /// The opposite seat is absent or not ready; tell the sender to wait.
    PeerNotReady,
    /// The command policy rejected the payload.
    Rejected(Verdict),
    /// Forward the frame verbatim through this writer.
    Forward(SeatWriter),
    /// The sender hit the opponent's token and the game is over.
    Win {
        /// The submitting seat's writer (gets "you won").
        winner: SeatWriter,
        /// The opponent's writer (gets "you lost").
        loser: SeatWriter,
    },
}

struct Seat {
    writer: SeatWriter,
    phase: FlagPhase,
    token: Option<Vec<u8>>,
    failures: u8,
}

impl Seat {
    fn new(writer: SeatWriter) -> Self {
        Self {
            writer,
            phase: FlagPhase::Idle,
            token: None,
            failures: 0,
        }
    }
}

struct GameState {
    seats: [Option<Seat>; 2],
    stopped: Option<StopReason>,
}

/// A paired two-seat session.
pub struct Game {
    state: Mutex<GameState>,
    stop_tx: watch::Sender<bool>,
    policy: Arc<CommandPolicy>,
    max_flag_retries: u8,
}

impl Game {
    /// Create a game with its first seat occupied.
    pub fn with_first_seat(
        writer: SeatWriter,
        policy: Arc<CommandPolicy>,
        max_flag_retries: u8,
    ) -> (Arc<Game>, SeatId) {
        let (stop_tx, _) = watch::channel(false);
        let game = Arc::new(Game {
            state: Mutex::new(GameState {
                seats: [Some(Seat::new(writer)), None],
                stopped: None,
            }),
            stop_tx,
            policy,
            max_flag_retries,
        });
        (game, SeatId::FIRST)
    }

    /// Seat a second connection. Fails if the game is full or stopped.
    pub fn attach_second(&self, writer: SeatWriter) -> Option<SeatId> {
        let mut state = self.lock();
        if state.stopped.is_some() || state.seats[1].is_some() {
            return None;
        }
        state.seats[1] = Some(Seat::new(writer));
        Some(SeatId::SECOND)
    }

    /// Subscribe to the stop channel.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Number of live seats, 0–2.
    pub fn seat_count(&self) -> usize {
        self.lock().seats.iter().flatten().count()
    }

    /// Whether the stop flag has been raised.
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped.is_some()
    }

    /// Why the game stopped, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.lock().stopped
    }

    /// Raise the stop flag with `reason` and signal the stop channel. The
    /// first reason to land wins; later calls only re-signal.
    pub fn stop(&self, reason: StopReason) {
        {
            let mut state = self.lock();
            if state.stopped.is_none() {
                state.stopped = Some(reason);
            }
        }
        let _ = self.stop_tx.send(true);
    }

    /// Remove a departing seat, stop the game, and wake the peer. The wakeup
    /// is signalled before the caller closes its socket halves.
    pub fn detach(&self, seat: SeatId) {
        {
            let mut state = self.lock();
            state.seats[seat.0] = None;
            if state.stopped.is_none() {
                state.stopped = Some(StopReason::Departure);
            }
        }
        let _ = self.stop_tx.send(true);
    }

    /// Open flag provisioning for a freshly attached seat. Returns the
    /// frame the handler must send to the seat.
    pub fn begin_provisioning(&self, seat: SeatId) -> Vec<u8> {
        let mut state = self.lock();
        if let Some(seat) = state.seats[seat.0].as_mut() {
            seat.phase = FlagPhase::AwaitDir;
        }
        messages::FLG_DIR.clone()
    }

    /// Whether the seat has completed provisioning.
    pub fn is_ready(&self, seat: SeatId) -> bool {
        self.lock().seats[seat.0]
            .as_ref()
            .is_some_and(|s| s.phase == FlagPhase::Ready)
    }

    /// The seat's flag token, once provisioned. Test-visible win condition.
    pub fn flag_token(&self, seat: SeatId) -> Option<Vec<u8>> {
        self.lock().seats[seat.0]
            .as_ref()
            .and_then(|s| s.token.clone())
    }

    /// Feed one `FLG` payload from `seat` into its provisioning machine.
    pub fn on_flag_payload(&self, seat: SeatId, payload: &[u8]) -> FlagOutcome {
        let mut state = self.lock();
        if state.stopped.is_some() {
            return FlagOutcome::Silent;
        }
        let max_retries = self.max_flag_retries;
        let Some(entry) = state.seats[seat.0].as_mut() else {
            return FlagOutcome::Silent;
        };
        match entry.phase {
            FlagPhase::AwaitDir => {
                if !self.policy.screen_flag_dir(payload).is_accepted() {
                    return fail_provisioning(entry, max_retries);
                }
                let token = match generate_token(FLAG_TOKEN_LEN) {
                    Ok(token) => token,
                    Err(e) => {
                        tracing::warn!(%seat, error = %e, "flag token generation failed");
                        return fail_provisioning(entry, max_retries);
                    }
                };
                // The directory screened clean, so it interpolates into the
                // command without quoting surprises.
                let dir = String::from_utf8_lossy(payload);
                let command = format!("echo '{token}' > {dir}/{FLAG_FILE_NAME}");
                entry.token = Some(token.into_bytes());
                entry.phase = FlagPhase::AwaitCreateAck;
                FlagOutcome::Reply(encode(Tag::Flg, command.as_bytes()))
            }
            FlagPhase::AwaitCreateAck => {
                if payload == b"okay" {
                    entry.phase = FlagPhase::Ready;
                    entry.failures = 0;
                    tracing::debug!(%seat, "flag provisioned");
                    FlagOutcome::Silent
                } else {
                    // The client could not create the flag file; restart
                    // from directory selection.
                    entry.token = None;
                    entry.phase = FlagPhase::AwaitDir;
                    entry.failures += 1;
                    if entry.failures >= max_retries {
                        FlagOutcome::Disconnect
                    } else {
                        FlagOutcome::Silent
                    }
                }
            }
            // FLG traffic outside provisioning is consumed, never relayed.
            FlagPhase::Idle | FlagPhase::Ready => FlagOutcome::Silent,
        }
    }

    /// Route a gameplay frame whose leading segment is (`tag`, `payload`).
    ///
    /// The win check and the stop transition happen under the same lock
    /// acquisition, so exactly one seat can ever be declared the winner.
    pub fn route(&self, seat: SeatId, tag: Tag, payload: &[u8]) -> RouteOutcome {
        let mut state = self.lock();
        if state.stopped.is_some() {
            return RouteOutcome::Discard;
        }
        let Some(sender) = state.seats[seat.0].as_ref() else {
            return RouteOutcome::Discard;
        };
        if sender.phase != FlagPhase::Ready {
            return RouteOutcome::Discard;
        }
        let sender_writer = sender.writer.clone();
        let Some(peer) = state.seats[seat.peer().0].as_ref() else {
            return RouteOutcome::PeerNotReady;
        };
        if peer.phase != FlagPhase::Ready {
            return RouteOutcome::PeerNotReady;
        }
        let peer_writer = peer.writer.clone();

        if tag == Tag::Cmd {
            if peer.token.as_deref() == Some(payload) {
                state.stopped = Some(StopReason::Win);
                drop(state);
                let _ = self.stop_tx.send(true);
                return RouteOutcome::Win {
                    winner: sender_writer,
                    loser: peer_writer,
                };
            }
            let verdict = self.policy.screen(payload);
            if !verdict.is_accepted() {
                return RouteOutcome::Rejected(verdict);
            }
        }
        RouteOutcome::Forward(peer_writer)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GameState> {
        // Seat handlers never panic while holding the lock; recover the
        // guard anyway so one poisoned game cannot wedge the reaper.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn fail_provisioning(seat: &mut Seat, max_retries: u8) -> FlagOutcome {
    seat.failures += 1;
    if seat.failures >= max_retries {
        FlagOutcome::Disconnect
    } else {
        FlagOutcome::Reply(messages::FLG_ERROR.clone())
    }
}
