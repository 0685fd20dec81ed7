use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 5000;
pub const MAX_FIELD_LEN: usize = 25;
pub const MAX_LINE_LEN: usize = 1024;
pub const CREDENTIAL_DELIMITER: &str = "::";
pub const FLOOD_INTERVAL: Duration = Duration::from_secs(1);
pub const FRAME_DELAY: Duration = Duration::from_millis(33);

pub const MODE_PROMPT: &str = "Use login or register :";
pub const CREDENTIALS_PROMPT: &str = "Enter pseudo and password: ";

pub const ERROR_PREFIX: &str = "[ERROR]";
pub const OK_PREFIX: &str = "[OK]";
pub const INFO_PREFIX: &str = "[INFO]";
pub const WHISPER_PREFIX: &str = "[WHISPER]";
pub const HELP_PREFIX: &str = "[HELP]";
pub const ADMIN_PREFIX: &str = "[ADMIN]";

/// Clears the terminal and homes the cursor before an animation frame.
pub const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

pub const SHUTDOWN_NOTICE: &str = "[INFO] Server shutting down.";

pub const HELP_TEXT: &str = "[HELP] Commands: exit, whisper <pseudo> <msg>, help";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    Register,
}

impl AuthMode {
    /// Accepts `login` or `register`, ignoring case and surrounding whitespace.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.eq_ignore_ascii_case("login") {
            Some(AuthMode::Login)
        } else if token.eq_ignore_ascii_case("register") {
            Some(AuthMode::Register)
        } else {
            None
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credentials must be formatted as pseudo::password")]
    InvalidFormat,
    #[error("pseudo or password is empty, too long, or malformed")]
    InvalidCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub pseudo: String,
    pub password: String,
}

impl Credentials {
    /// Splits a `pseudo::password` line. Exactly one delimiter is allowed.
    pub fn parse(line: &str) -> Result<Self, CredentialError> {
        let parts: Vec<&str> = line.trim().split(CREDENTIAL_DELIMITER).collect();
        if parts.len() != 2 {
            return Err(CredentialError::InvalidFormat);
        }

        Ok(Self {
            pseudo: parts[0].to_string(),
            password: parts[1].to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), CredentialError> {
        if !is_valid_pseudo(&self.pseudo) || !is_valid_password(&self.password) {
            return Err(CredentialError::InvalidCredentials);
        }
        Ok(())
    }
}

pub fn is_valid_pseudo(pseudo: &str) -> bool {
    !pseudo.trim().is_empty()
        && pseudo.chars().count() <= MAX_FIELD_LEN
        && !pseudo.chars().any(char::is_whitespace)
}

pub fn is_valid_password(password: &str) -> bool {
    !password.trim().is_empty() && password.chars().count() <= MAX_FIELD_LEN
}

/// A handshake reply starting with one of these prefixes ends the exchange.
pub fn is_terminal_handshake_reply(line: &str) -> bool {
    line.starts_with(ERROR_PREFIX) || line.starts_with(OK_PREFIX)
}

/// Wall-clock stamp used in chat lines, e.g. `[14:05]`.
pub fn clock_stamp() -> String {
    format!("[{}]", chrono::Local::now().format("%H:%M"))
}

pub fn public_line(pseudo: &str, text: &str) -> String {
    format!("{} {} : {}", clock_stamp(), pseudo, text)
}

pub fn whisper_line(from: &str, to: &str, text: &str) -> String {
    format!("{} {} {} -> {}: {}", WHISPER_PREFIX, clock_stamp(), from, to, text)
}

pub fn info_line(text: &str) -> String {
    format!("{} {} {}", INFO_PREFIX, clock_stamp(), text)
}

pub fn admin_line(text: &str) -> String {
    format!("{} {} {}", ADMIN_PREFIX, clock_stamp(), text)
}

pub fn error_line(text: &str) -> String {
    format!("{} {}", ERROR_PREFIX, text)
}

pub fn frames_per_second(delay: Duration) -> f32 {
    if delay.is_zero() {
        return 0.0;
    }
    1.0 / delay.as_secs_f32()
}
