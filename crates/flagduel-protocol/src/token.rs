//! Random flag tokens and directory names.
//!
//! Flag tokens are the win-condition secret, so they are drawn from the
//! operating system's CSPRNG ([`rand::rngs::OsRng`]) rather than a seeded
//! generator. Bytes are mapped onto the alphabet with rejection sampling to
//! keep the draw uniform.

use rand::RngCore;
use rand::rngs::OsRng;

/// Length of a seat's flag token in bytes.
pub const FLAG_TOKEN_LEN: usize = 31;

/// Token alphabet: printable ASCII that survives single-quoted shell
/// interpolation unescaped.
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Directory-name alphabet: lowercase letters only.
const PATH_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Shortest generated directory name.
const PATH_MIN_LEN: usize = 8;

/// Longest generated directory name. Far below the 256-byte path buffer the
/// clients reserve.
const PATH_MAX_LEN: usize = 24;

/// Names a generated directory must never collide with.
const RESERVED_NAMES: &[&str] = &["flag", "etc"];

/// Errors from the random generators.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The OS random source failed.
    #[error("system random source failed: {0}")]
    Rng(#[from] rand::Error),

    /// A requested length does not fit the caller's buffer contract.
    #[error("requested length {0} is out of range")]
    BadLength(usize),
}

/// Generate a uniformly random token of `len` bytes over the token alphabet.
pub fn generate_token(len: usize) -> Result<String, TokenError> {
    if len == 0 || len > 256 {
        return Err(TokenError::BadLength(len));
    }
    sample(len, TOKEN_ALPHABET)
}

/// Generate a random directory name: lowercase letters, bounded length,
/// never a reserved name.
pub fn generate_random_path() -> Result<String, TokenError> {
    let span = PATH_MAX_LEN - PATH_MIN_LEN + 1;
    let len = PATH_MIN_LEN + usize::from(sample_byte(span as u8)?);
    loop {
        let name = sample(len, PATH_ALPHABET)?;
        if !RESERVED_NAMES.contains(&name.as_str()) {
            return Ok(name);
        }
    }
}

/// Draw `len` characters uniformly from `alphabet`.
fn sample(len: usize, alphabet: &[u8]) -> Result<String, TokenError> {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        let index = usize::from(sample_byte(alphabet.len() as u8)?);
        out.push(char::from(alphabet[index]));
    }
    Ok(out)
}

/// Draw one uniform value in `0..bound` via rejection sampling.
fn sample_byte(bound: u8) -> Result<u8, TokenError> {
    let zone = 255 - (255 % bound);
    loop {
        let mut byte = [0u8; 1];
        OsRng.try_fill_bytes(&mut byte)?;
        if byte[0] < zone {
            return Ok(byte[0] % bound);
        }
    }
}
