use std::time::Duration;

use bon::Builder;

const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_BUFFER_SIZE: usize = 1024;
/// Default cap on incomplete data held by the framer: 1 MiB.
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 1024 * 1024;

/// Configuration for the social stream connection.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Interval between whitespace keepalives sent to the server. Must not be zero.
    #[builder(default = DEFAULT_KEEPALIVE_INTERVAL)]
    pub keepalive_interval: Duration,
    /// Maximum time to wait for each handshake response
    #[builder(default = DEFAULT_HANDSHAKE_TIMEOUT)]
    pub handshake_timeout: Duration,
    /// Size of each socket read. During the handshake a read shorter than this ends a response.
    #[builder(default = DEFAULT_READ_BUFFER_SIZE)]
    pub read_buffer_size: usize,
    /// Incomplete data past this many bytes is discarded with an error
    #[builder(default = DEFAULT_MAX_BUFFERED_BYTES)]
    pub max_buffered_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = Config::default();

        assert_eq!(config.keepalive_interval, Duration::from_secs(20));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.max_buffered_bytes, 1_048_576);
    }

    #[test]
    fn builder_overrides_keepalive() {
        let config = Config::builder()
            .keepalive_interval(Duration::from_millis(50))
            .build();

        assert_eq!(config.keepalive_interval, Duration::from_millis(50));
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
    }
}
