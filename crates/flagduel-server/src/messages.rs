//! Prebuilt control frames the server sends.
//!
//! Every fixed server reply is encoded once and reused; the byte layout of
//! these frames is part of the wire contract with existing clients.

use std::sync::LazyLock;

use flagduel_protocol::{Tag, encode};

/// Opens flag provisioning on a freshly seated connection.
pub static FLG_DIR: LazyLock<Vec<u8>> = LazyLock::new(|| encode(Tag::Flg, b"FLG_DIR"));

/// Provisioning failed on the server side; the client should offer a new
/// directory.
pub static FLG_ERROR: LazyLock<Vec<u8>> = LazyLock::new(|| encode(Tag::Flg, b"error"));

/// The sender's game has no ready opponent yet.
pub static WAIT_PEER: LazyLock<Vec<u8>> =
    LazyLock::new(|| encode(Tag::Err, b"wait for second client"));

/// The command policy rejected the sender's command.
pub static INVALID_DATA: LazyLock<Vec<u8>> =
    LazyLock::new(|| encode(Tag::Err, b"command not allowed"));

/// The opponent's connection is gone.
pub static DISCONNECTED: LazyLock<Vec<u8>> =
    LazyLock::new(|| encode(Tag::Err, b"Second client disconnected"));

/// The server is at its game capacity.
pub static GAME_LIMIT: LazyLock<Vec<u8>> =
    LazyLock::new(|| encode(Tag::Err, b"game limit reached"));

/// Sent to the seat that submitted the opponent's flag token.
pub static YOU_WON: LazyLock<Vec<u8>> = LazyLock::new(|| encode(Tag::Out, b"you won"));

/// Sent to the seat whose flag token was submitted.
pub static YOU_LOST: LazyLock<Vec<u8>> = LazyLock::new(|| encode(Tag::Out, b"you lost"));
