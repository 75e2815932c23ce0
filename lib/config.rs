// Session configuration, read from environment variables
//
// OSD_RECV_TIMEOUT_MS:    receive timeout of non-blocking calls (default: 1000)
// OSD_POLL_INTERVAL_MS:   I/O worker stop-check interval (default: 20)
// OSD_MAX_PKT_LEN_WORDS:  fixed maximum packet length in data words; when
//                         unset it is read from the SCM of the target subnet
use once_cell::sync::Lazy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_RECV_TIMEOUT_MS: u64 = 1000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 20;

static ENV_CONFIG: Lazy<SessionConfig> = Lazy::new(SessionConfig::from_env);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long non-blocking register accesses and event receives wait
    pub receive_timeout: Duration,
    /// How often the I/O worker checks whether it should stop
    pub poll_interval: Duration,
    /// Overrides the SCM-reported maximum packet length (data words)
    pub max_pkt_len_words: Option<u16>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            receive_timeout: Duration::from_millis(DEFAULT_RECV_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_pkt_len_words: None,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let defaults = SessionConfig::default();
        SessionConfig {
            receive_timeout: env_parse("OSD_RECV_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.receive_timeout),
            poll_interval: env_parse("OSD_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            max_pkt_len_words: env_parse("OSD_MAX_PKT_LEN_WORDS").or(defaults.max_pkt_len_words),
        }
    }

    /// Process-wide configuration, read from the environment once
    pub fn global() -> &'static SessionConfig {
        &ENV_CONFIG
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_max_pkt_len_words(mut self, words: u16) -> Self {
        self.max_pkt_len_words = Some(words);
        self
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
