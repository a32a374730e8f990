//! Per-seat connection handler.
//!
//! Each seat runs one task that owns the socket's read half and multiplexes
//! framed reads, the game's stop channel, the global shutdown flag, and a
//! bounded timer that caps how long a quiet handler can go without noticing
//! either flag. The handler never propagates an error upward — every
//! failure either turns into a wire reply or ends the seat.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use flagduel_protocol::{Frame, Tag, frame, write_frame};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::watch;

use crate::game::{FlagOutcome, Game, RouteOutcome, SeatId, SeatWriter, StopReason};
use crate::messages;

/// Everything a seat handler needs at spawn time.
pub struct SeatHandler {
    /// The shared game this seat belongs to.
    pub game: Arc<Game>,
    /// Which seat this handler drives.
    pub seat: SeatId,
    /// Read half of the seat's socket; owned exclusively by this handler.
    pub reader: OwnedReadHalf,
    /// Write half, shared with the peer handler for relays.
    pub writer: SeatWriter,
    /// Global shutdown flag.
    pub shutdown: watch::Receiver<bool>,
    /// Global live-handler count; decremented exactly once on exit.
    pub live: Arc<AtomicUsize>,
    /// Tick bound for observing stop/shutdown.
    pub timer: Duration,
}

impl SeatHandler {
    /// Drive the seat until the connection ends, the game stops, or the
    /// server shuts down.
    pub async fn run(mut self) {
        let mut stop_rx = self.game.subscribe_stop();
        let mut buf = Vec::new();

        let hello = self.game.begin_provisioning(self.seat);
        if self.send_own(&hello).await.is_err() {
            self.finish().await;
            return;
        }

        loop {
            tokio::select! {
                result = frame::read_frame(&mut self.reader, &mut buf) => match result {
                    Ok(Some(bytes)) => {
                        if !self.process(&bytes).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(seat = %self.seat, "connection closed by client");
                        break;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                        // Malformed traffic is discarded; the seat stays up.
                        tracing::debug!(seat = %self.seat, error = %e, "discarding malformed frame");
                    }
                    Err(e) => {
                        tracing::debug!(seat = %self.seat, error = %e, "receive failed");
                        break;
                    }
                },
                _ = stop_rx.changed() => {
                    if self.observe_stop().await {
                        break;
                    }
                }
                changed = self.shutdown.changed() => {
                    // A dropped shutdown sender means the server is going
                    // away; treat it like the flag.
                    if changed.is_err() || *self.shutdown.borrow() {
                        self.game.stop(StopReason::Shutdown);
                        break;
                    }
                }
                _ = tokio::time::sleep(self.timer) => {
                    if *self.shutdown.borrow() {
                        self.game.stop(StopReason::Shutdown);
                        break;
                    }
                    if self.observe_stop().await {
                        break;
                    }
                }
            }
        }

        self.finish().await;
    }

    /// React to the game's stop flag. Returns true once the handler should
    /// exit. The disconnect notice is sent only when the peer left — a win
    /// or a server shutdown ends the seat silently.
    async fn observe_stop(&self) -> bool {
        match self.game.stop_reason() {
            Some(StopReason::Departure) => {
                let _ = self.send_own(&messages::DISCONNECTED).await;
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Handle one decoded frame. Returns false when the seat must exit.
    async fn process(&self, bytes: &[u8]) -> bool {
        let parsed = match Frame::parse(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(seat = %self.seat, error = %e, "unparseable frame");
                return true;
            }
        };
        let leading = match parsed.leading() {
            Ok(segment) => segment,
            Err(e) => {
                tracing::debug!(seat = %self.seat, error = %e, "frame with no leading segment");
                return true;
            }
        };

        if leading.tag == Tag::Flg {
            return self.drive_provisioning(leading.payload).await;
        }

        match self.game.route(self.seat, leading.tag, leading.payload) {
            RouteOutcome::Discard => true,
            RouteOutcome::PeerNotReady => self.send_own(&messages::WAIT_PEER).await.is_ok(),
            RouteOutcome::Rejected(verdict) => {
                tracing::debug!(seat = %self.seat, ?verdict, "command rejected");
                self.send_own(&messages::INVALID_DATA).await.is_ok()
            }
            RouteOutcome::Forward(peer) => {
                tracing::debug!(seat = %self.seat, tag = %leading.tag, len = bytes.len(), "relaying frame");
                // A failed relay means the peer is going away; its own
                // handler will notice and tear the game down.
                let _ = send_to(&peer, bytes).await;
                true
            }
            RouteOutcome::Win { winner, loser } => {
                tracing::info!(seat = %self.seat, "flag captured, game over");
                let _ = send_to(&winner, &messages::YOU_WON).await;
                let _ = send_to(&loser, &messages::YOU_LOST).await;
                false
            }
        }
    }

    /// Feed a `FLG` payload to the provisioning machine and act on the
    /// outcome. Returns false when the seat must be dropped.
    async fn drive_provisioning(&self, payload: &[u8]) -> bool {
        match self.game.on_flag_payload(self.seat, payload) {
            FlagOutcome::Reply(frame) => self.send_own(&frame).await.is_ok(),
            FlagOutcome::Disconnect => {
                tracing::warn!(seat = %self.seat, "provisioning failed too many times, dropping seat");
                false
            }
            FlagOutcome::Silent => true,
        }
    }

    async fn send_own(&self, frame_bytes: &[u8]) -> std::io::Result<()> {
        send_to(&self.writer, frame_bytes).await
    }

    /// Leave the game and release this handler's slot in the live count.
    /// `detach` signals the stop channel before the socket halves drop, so
    /// the peer wakes while its write side is still open.
    async fn finish(self) {
        self.game.detach(self.seat);
        self.live.fetch_sub(1, Ordering::AcqRel);
        tracing::info!(seat = %self.seat, "seat handler exited");
    }
}

async fn send_to(writer: &SeatWriter, frame_bytes: &[u8]) -> std::io::Result<()> {
    let mut guard = writer.lock().await;
    write_frame(&mut *guard, frame_bytes).await
}
