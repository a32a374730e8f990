//! Flagduel wire protocol, command screening, and secret generation.
//!
//! This crate is shared ground between the server and any client: the
//! byte-exact frame codec ([`frame`]), the relay command policy
//! ([`policy`]), and the random token/path generators ([`token`]).

#![deny(unsafe_code)]

pub mod frame;
pub mod policy;
pub mod token;

pub use frame::{Frame, Segment, Tag, WireError, encode, read_frame, write_frame};
pub use policy::{CommandPolicy, MAX_CMD_LEN, Verdict};
pub use token::{FLAG_TOKEN_LEN, TokenError, generate_random_path, generate_token};
