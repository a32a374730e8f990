//! Server-side command screening: what may be relayed to the other player.
//!
//! Every `CMD` payload passes through [`CommandPolicy::screen`] before the
//! server forwards it. The check is two-stage: a banned-substring scan
//! (shell redirect/chain metacharacters, path escapes, the flag file name),
//! then a match of the leading token against the allowed command set. The
//! same banned-substring scan also gates the directory a client offers
//! during flag provisioning ([`CommandPolicy::screen_flag_dir`]).

/// Longest `CMD` payload the server will relay, in bytes.
pub const MAX_CMD_LEN: usize = 250;

/// Name of the file each player's flag token is written into.
pub const FLAG_FILE_NAME: &str = "flag.txt";

/// Substrings that disqualify a command or directory outright.
const BANNED_SUBSTRINGS: &[&str] = &[
    ">", "<", "|", ";", "&", "`", "$", "\n", "..", "/etc", FLAG_FILE_NAME,
];

/// Commands a player is allowed to run in the opponent's sandbox.
const ALLOWED_COMMANDS: &[&str] = &["ls", "cat", "cd", "echo", "pwd", "openssl"];

/// Outcome of screening one `CMD` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The command may be forwarded to the peer.
    Accepted,
    /// The payload is not valid UTF-8 text.
    NotText,
    /// The payload exceeds [`MAX_CMD_LEN`].
    TooLong {
        /// Actual payload length in bytes.
        len: usize,
    },
    /// The payload contains a banned substring.
    Banned {
        /// The substring that matched.
        token: &'static str,
    },
    /// The leading token is not an allowed command.
    UnknownCommand,
}

impl Verdict {
    /// Whether the payload passed every check.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// The relay screening rules. [`CommandPolicy::default`] carries the
/// canonical banned and allowed sets.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    banned: Vec<&'static str>,
    allowed: Vec<&'static str>,
    max_cmd_len: usize,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            banned: BANNED_SUBSTRINGS.to_vec(),
            allowed: ALLOWED_COMMANDS.to_vec(),
            max_cmd_len: MAX_CMD_LEN,
        }
    }
}

impl CommandPolicy {
    /// Screen a `CMD` payload bound for the opposite seat.
    pub fn screen(&self, payload: &[u8]) -> Verdict {
        if payload.len() > self.max_cmd_len {
            return Verdict::TooLong { len: payload.len() };
        }
        let Ok(text) = std::str::from_utf8(payload) else {
            return Verdict::NotText;
        };
        if let Some(token) = self.find_banned(text) {
            return Verdict::Banned { token };
        }
        match text.split_whitespace().next() {
            Some(head) if self.allowed.contains(&head) => Verdict::Accepted,
            _ => Verdict::UnknownCommand,
        }
    }

    /// Screen a directory offered by a client during flag provisioning.
    ///
    /// Only the banned-substring rules apply; the directory is not a command
    /// and has no leading-token requirement. The length bound keeps the
    /// resulting flag-write command inside one frame.
    pub fn screen_flag_dir(&self, dir: &[u8]) -> Verdict {
        if dir.is_empty() {
            return Verdict::UnknownCommand;
        }
        if dir.len() > self.max_cmd_len {
            return Verdict::TooLong { len: dir.len() };
        }
        let Ok(text) = std::str::from_utf8(dir) else {
            return Verdict::NotText;
        };
        match self.find_banned(text) {
            Some(token) => Verdict::Banned { token },
            None => Verdict::Accepted,
        }
    }

    fn find_banned(&self, text: &str) -> Option<&'static str> {
        self.banned
            .iter()
            .copied()
            .find(|token| text.contains(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_commands_accepted() {
        let policy = CommandPolicy::default();
        for cmd in ["ls", "ls -la /tmp", "cat readme", "cd /tmp", "pwd", "echo hi"] {
            assert!(
                policy.screen(cmd.as_bytes()).is_accepted(),
                "{cmd:?} should be accepted"
            );
        }
    }

    #[test]
    fn test_openssl_is_allowed() {
        let policy = CommandPolicy::default();
        let cmd = b"openssl enc -d -aes-256-cbc -in secret -k hunter2 -pbkdf2";
        assert!(policy.screen(cmd).is_accepted());
    }

    #[test]
    fn test_disallowed_leading_token_rejected() {
        let policy = CommandPolicy::default();
        for cmd in ["rm -rf /", "curl example.com", "bash", "lsblk"] {
            assert_eq!(policy.screen(cmd.as_bytes()), Verdict::UnknownCommand);
        }
    }

    #[test]
    fn test_shell_metacharacters_rejected() {
        let policy = CommandPolicy::default();
        for (cmd, token) in [
            ("ls > /tmp/out", ">"),
            ("cat <x", "<"),
            ("ls | cat", "|"),
            ("ls; cat x", ";"),
            ("ls & cat x", "&"),
            ("echo `id`", "`"),
            ("echo $HOME", "$"),
        ] {
            assert_eq!(policy.screen(cmd.as_bytes()), Verdict::Banned { token });
        }
    }

    #[test]
    fn test_path_escapes_rejected() {
        let policy = CommandPolicy::default();
        assert_eq!(
            policy.screen(b"cat ../secret"),
            Verdict::Banned { token: ".." }
        );
        assert_eq!(
            policy.screen(b"cat /etc/passwd"),
            Verdict::Banned { token: "/etc" }
        );
    }

    #[test]
    fn test_flag_file_reference_rejected() {
        let policy = CommandPolicy::default();
        assert_eq!(
            policy.screen(b"cat /tmp/x/flag.txt"),
            Verdict::Banned { token: FLAG_FILE_NAME }
        );
    }

    #[test]
    fn test_length_boundary_250_accepted_251_rejected() {
        let policy = CommandPolicy::default();

        let mut cmd = b"echo ".to_vec();
        cmd.resize(250, b'a');
        assert!(policy.screen(&cmd).is_accepted());

        cmd.resize(251, b'a');
        assert_eq!(policy.screen(&cmd), Verdict::TooLong { len: 251 });
    }

    #[test]
    fn test_empty_and_whitespace_payloads_rejected() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.screen(b""), Verdict::UnknownCommand);
        assert_eq!(policy.screen(b"   "), Verdict::UnknownCommand);
    }

    #[test]
    fn test_non_utf8_payload_rejected() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.screen(&[b'l', b's', 0xff, 0xfe]), Verdict::NotText);
    }

    #[test]
    fn test_newline_smuggling_rejected() {
        let policy = CommandPolicy::default();
        assert_eq!(
            policy.screen(b"ls\nrm -rf /"),
            Verdict::Banned { token: "\n" }
        );
    }

    #[test]
    fn test_flag_dir_screening() {
        let policy = CommandPolicy::default();
        assert!(policy.screen_flag_dir(b"/tmp/x").is_accepted());
        assert!(policy.screen_flag_dir(b"/home/player/arena").is_accepted());

        assert_eq!(
            policy.screen_flag_dir(b"/tmp/../root"),
            Verdict::Banned { token: ".." }
        );
        assert_eq!(
            policy.screen_flag_dir(b"/etc/cron.d"),
            Verdict::Banned { token: "/etc" }
        );
        assert_eq!(
            policy.screen_flag_dir(b"/tmp; rm x"),
            Verdict::Banned { token: ";" }
        );
        assert_eq!(policy.screen_flag_dir(b""), Verdict::UnknownCommand);
    }

    #[test]
    fn test_flag_dir_does_not_require_allowed_command() {
        // A directory is not a command; "/tmp/x" has no allowed leading
        // token but must still pass.
        let policy = CommandPolicy::default();
        assert!(policy.screen_flag_dir(b"/tmp/x").is_accepted());
        assert_eq!(policy.screen(b"/tmp/x"), Verdict::UnknownCommand);
    }
}
