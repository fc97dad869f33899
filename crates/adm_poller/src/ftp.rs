//! FTP sessions backed by `suppaftp`.

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::ToSocketAddrs;
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tracing::debug;

use crate::error::TransportError;
use crate::target::PollTarget;
use crate::transport::{Connector, RemoteSession};

/// Connect and per-read socket timeout.
pub const DEFAULT_FTP_TIMEOUT: Duration = Duration::from_secs(25);

static REPLY_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([1-5]\d\d)\b").expect("reply code pattern is valid"));

impl From<FtpError> for TransportError {
    fn from(err: FtpError) -> Self {
        match err {
            FtpError::ConnectionError(io) => TransportError::Io(io),
            other => {
                let message = other.to_string();
                match REPLY_CODE
                    .captures(&message)
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| m.as_str().parse::<u32>().ok())
                {
                    Some(code) => TransportError::Refused { code, message },
                    None => TransportError::Protocol(message),
                }
            }
        }
    }
}

/// Plain (non-TLS) FTP in passive mode.
#[derive(Debug, Clone)]
pub struct FtpConnector {
    timeout: Duration,
}

impl Default for FtpConnector {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FTP_TIMEOUT,
        }
    }
}

impl FtpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Connector for FtpConnector {
    fn connect(&self, target: &PollTarget) -> Result<Box<dyn RemoteSession>, TransportError> {
        let address = target.address();
        let socket = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TransportError::Resolve(address.clone()))?;

        let mut stream = FtpStream::connect_timeout(socket, self.timeout)?;
        if let Err(e) = stream.get_ref().set_read_timeout(Some(self.timeout)) {
            debug!("Could not set FTP read timeout: {}", e);
        }
        stream.login(target.username.as_str(), target.password.as_str())?;
        if let Err(e) = stream.transfer_type(FileType::Binary) {
            debug!("Server rejected TYPE I at login: {}", e);
        }

        debug!("FTP session open to {}", address);
        Ok(Box::new(FtpSession { stream }))
    }
}

struct FtpSession {
    stream: FtpStream,
}

impl RemoteSession for FtpSession {
    fn change_dir(&mut self, dir: &str) -> Result<(), TransportError> {
        Ok(self.stream.cwd(dir)?)
    }

    fn list_facts(&mut self) -> Result<Vec<String>, TransportError> {
        Ok(self.stream.mlsd(None)?)
    }

    fn list_names(&mut self) -> Result<Vec<String>, TransportError> {
        Ok(self.stream.nlst(None)?)
    }

    fn list_long(&mut self) -> Result<Vec<String>, TransportError> {
        Ok(self.stream.list(None)?)
    }

    fn size(&mut self, name: &str) -> Result<u64, TransportError> {
        Ok(self.stream.size(name)? as u64)
    }

    fn modified(&mut self, name: &str) -> Result<DateTime<Utc>, TransportError> {
        let naive = self.stream.mdtm(name)?;
        Ok(Utc.from_utc_datetime(&naive))
    }

    fn set_binary(&mut self) -> Result<(), TransportError> {
        Ok(self.stream.transfer_type(FileType::Binary)?)
    }

    fn restart_at(&mut self, offset: u64) -> Result<(), TransportError> {
        let offset = usize::try_from(offset)
            .map_err(|_| TransportError::Protocol(format!("offset {} does not fit in usize", offset)))?;
        Ok(self.stream.resume_transfer(offset)?)
    }

    fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, TransportError> {
        Ok(self.stream.retr_as_buffer(name)?.into_inner())
    }

    fn quit(&mut self) -> Result<(), TransportError> {
        Ok(self.stream.quit()?)
    }
}
