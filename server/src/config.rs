//! Runtime settings for the chat server

use shared::{Credentials, DEFAULT_PORT, FLOOD_INTERVAL, FRAME_DELAY};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to, e.g. `0.0.0.0:5000`
    pub bind_addr: String,
    /// Credential table path; `None` keeps accounts in memory only
    pub users_file: Option<PathBuf>,
    /// Directory holding the pre-rendered animation frames
    pub frames_dir: PathBuf,
    pub frame_delay: Duration,
    pub flood_interval: Duration,
    /// Operator credentials checked once at startup
    pub operator: Option<Credentials>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            users_file: None,
            frames_dir: PathBuf::from("frames"),
            frame_delay: FRAME_DELAY,
            flood_interval: FLOOD_INTERVAL,
            operator: None,
        }
    }
}

impl ServerConfig {
    /// Loopback configuration on an ephemeral port
    pub fn local() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            ..Self::default()
        }
    }

    pub fn with_frames_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.frames_dir = dir.into();
        self
    }

    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    pub fn with_flood_interval(mut self, interval: Duration) -> Self {
        self.flood_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:5000");
        assert_eq!(config.frame_delay, Duration::from_millis(33));
        assert_eq!(config.flood_interval, Duration::from_secs(1));
        assert!(config.users_file.is_none());
        assert!(config.operator.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = ServerConfig::local()
            .with_frames_dir("/tmp/frames")
            .with_frame_delay(Duration::from_millis(5))
            .with_flood_interval(Duration::ZERO);

        assert_eq!(config.bind_addr, "127.0.0.1:0");
        assert_eq!(config.frames_dir, PathBuf::from("/tmp/frames"));
        assert_eq!(config.frame_delay, Duration::from_millis(5));
        assert_eq!(config.flood_interval, Duration::ZERO);
    }
}
