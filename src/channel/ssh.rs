use super::Channel;
use crate::constants::timeouts;
use crate::errors::ChannelError;
use base64::Engine;
use ssh2::Session;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
    /// `SHA256:<base64>`; when set the server key must match.
    pub host_key_fingerprint: Option<String>,
    pub connect_timeout: Duration,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            password: None,
            private_key: None,
            passphrase: None,
            host_key_fingerprint: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Interactive login shell over SSH with a PTY attached.
pub struct SshChannel {
    // Keeps the transport alive for the channel.
    _session: Session,
    channel: ssh2::Channel,
    label: String,
    host_key: Option<String>,
}

fn fingerprint_host_key_sha256(session: &Session) -> Option<String> {
    let hash = session.host_key_hash(ssh2::HashType::Sha256)?;
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    Some(format!("SHA256:{}", encoded))
}

fn would_block(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
}

impl SshChannel {
    pub fn connect(target: &SshTarget) -> Result<Self, ChannelError> {
        let addr = format!("{}:{}", target.host, target.port);
        let resolved = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ChannelError::Connect(format!("cannot resolve {}", addr)))?;
        let tcp = TcpStream::connect_timeout(&resolved, target.connect_timeout)
            .map_err(|err| ChannelError::Connect(format!("{}: {}", addr, err)))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        let observed = fingerprint_host_key_sha256(&session);
        if let Some(expected) = target.host_key_fingerprint.as_ref() {
            if observed.as_ref() != Some(expected) {
                return Err(ChannelError::Connect(format!(
                    "host key mismatch (expected {}, got {})",
                    expected,
                    observed.unwrap_or_else(|| "unknown".to_string())
                )));
            }
        }

        if let Some(key) = target.private_key.as_ref() {
            session.userauth_pubkey_memory(
                &target.username,
                None,
                key,
                target.passphrase.as_deref(),
            )?;
        } else if let Some(password) = target.password.as_ref() {
            session.userauth_password(&target.username, password)?;
        }
        if !session.authenticated() {
            return Err(ChannelError::Connect("authentication failed".to_string()));
        }

        let mut channel = session.channel_session()?;
        channel.request_pty("xterm", None, None)?;
        channel.shell()?;
        session.set_blocking(false);

        Ok(Self {
            _session: session,
            channel,
            label: format!("ssh://{}@{}", target.username, addr),
            host_key: observed,
        })
    }

    pub fn host_key_fingerprint(&self) -> Option<&str> {
        self.host_key.as_deref()
    }
}

impl Channel for SshChannel {
    fn send(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let mut offset = 0;
        while offset < data.len() {
            match self.channel.write(&data[offset..]) {
                Ok(n) => offset += n,
                Err(err) if would_block(&err) => {
                    std::thread::sleep(Duration::from_millis(timeouts::CHANNEL_SLICE_MS));
                }
                Err(err) => return Err(err.into()),
            }
        }
        loop {
            match self.channel.flush() {
                Ok(()) => return Ok(()),
                Err(err) if would_block(&err) => {
                    std::thread::sleep(Duration::from_millis(timeouts::CHANNEL_SLICE_MS));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn recv(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; max.max(1)];
        loop {
            match self.channel.read(&mut buf) {
                Ok(n) if n > 0 => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Ok(_) => {
                    if self.channel.eof() {
                        return Err(ChannelError::Closed);
                    }
                }
                Err(err) if would_block(&err) => {}
                Err(err) => return Err(err.into()),
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            std::thread::sleep(Duration::from_millis(timeouts::CHANNEL_SLICE_MS));
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
