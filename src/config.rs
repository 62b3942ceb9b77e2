use crate::constants::{control, delimiters, limits, timeouts};
use crate::utils::feature_flags::{is_assume_pty_enabled, read_env_positive};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the transport layer. `from_env` is the usual entry point;
/// the `with_*` setters exist for embedding and tests.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub delimiter_length: usize,
    pub poll_interval: Duration,
    pub recv_timeout: Duration,
    pub reader_close_timeout: Duration,
    pub writer_close_timeout: Duration,
    pub reclaim_timeout: Duration,
    pub flush_threshold: usize,
    pub agent_write_chunk: usize,
    pub control_codes: Vec<u8>,
    pub catalog_path: Option<PathBuf>,
    pub assume_pty: bool,
}

/// Bytes below 0x20 except newline, plus DEL.
pub fn default_control_codes() -> Vec<u8> {
    (0x00u8..0x20)
        .filter(|b| *b != control::NEWLINE)
        .chain(std::iter::once(control::DEL))
        .collect()
}

fn env_duration(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(read_env_positive(key).unwrap_or(default_ms))
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            delimiter_length: delimiters::DEFAULT_LENGTH,
            poll_interval: Duration::from_millis(timeouts::POLL_INTERVAL_MS),
            recv_timeout: Duration::from_millis(timeouts::RECV_MS),
            reader_close_timeout: Duration::from_millis(timeouts::READER_CLOSE_MS),
            writer_close_timeout: Duration::from_millis(timeouts::WRITER_CLOSE_MS),
            reclaim_timeout: Duration::from_millis(timeouts::RECLAIM_MS),
            flush_threshold: limits::FLUSH_THRESHOLD,
            agent_write_chunk: limits::AGENT_WRITE_CHUNK,
            control_codes: default_control_codes(),
            catalog_path: None,
            assume_pty: false,
        }
    }
}

impl TransportConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let delimiter_length = read_env_positive("SHELLWIRE_DELIMITER_LENGTH")
            .map(|n| n as usize)
            .unwrap_or(defaults.delimiter_length)
            .max(delimiters::MIN_LENGTH);
        let catalog_path = std::env::var("SHELLWIRE_CATALOG_PATH")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self {
            delimiter_length,
            poll_interval: env_duration("SHELLWIRE_POLL_INTERVAL_MS", timeouts::POLL_INTERVAL_MS),
            recv_timeout: env_duration("SHELLWIRE_RECV_TIMEOUT_MS", timeouts::RECV_MS),
            reader_close_timeout: env_duration(
                "SHELLWIRE_READER_CLOSE_TIMEOUT_MS",
                timeouts::READER_CLOSE_MS,
            ),
            writer_close_timeout: env_duration(
                "SHELLWIRE_WRITER_CLOSE_TIMEOUT_MS",
                timeouts::WRITER_CLOSE_MS,
            ),
            reclaim_timeout: env_duration("SHELLWIRE_RECLAIM_TIMEOUT_MS", timeouts::RECLAIM_MS),
            flush_threshold: read_env_positive("SHELLWIRE_FLUSH_THRESHOLD")
                .map(|n| n as usize)
                .unwrap_or(defaults.flush_threshold),
            agent_write_chunk: read_env_positive("SHELLWIRE_AGENT_WRITE_CHUNK_BYTES")
                .map(|n| n as usize)
                .unwrap_or(defaults.agent_write_chunk),
            control_codes: defaults.control_codes,
            catalog_path,
            assume_pty: is_assume_pty_enabled(),
        }
    }

    pub fn with_delimiter_length(mut self, length: usize) -> Self {
        self.delimiter_length = length.max(delimiters::MIN_LENGTH);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn with_reader_close_timeout(mut self, timeout: Duration) -> Self {
        self.reader_close_timeout = timeout;
        self
    }

    pub fn with_writer_close_timeout(mut self, timeout: Duration) -> Self {
        self.writer_close_timeout = timeout;
        self
    }

    pub fn with_reclaim_timeout(mut self, timeout: Duration) -> Self {
        self.reclaim_timeout = timeout;
        self
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold.max(1);
        self
    }

    pub fn with_agent_write_chunk(mut self, bytes: usize) -> Self {
        self.agent_write_chunk = bytes.max(1);
        self
    }

    pub fn with_control_codes(mut self, codes: Vec<u8>) -> Self {
        self.control_codes = codes;
        self
    }

    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    pub fn with_assume_pty(mut self, assume: bool) -> Self {
        self.assume_pty = assume;
        self
    }
}
