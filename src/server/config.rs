//! Relay configuration

use std::net::{Ipv4Addr, SocketAddr};

use crate::error::{Error, Result};
use crate::protocol::frame::DEFAULT_SEPARATOR;

/// Port the relay listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 55055;

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Frame separator; must encode to a single byte
    pub separator: char,

    /// Relay full frames to everyone instead of filtering by model
    pub unfiltered: bool,

    /// Log per-frame activity
    pub verbose: bool,

    /// Enable TCP_NODELAY on accepted sockets
    pub tcp_nodelay: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            separator: DEFAULT_SEPARATOR as char,
            unfiltered: false,
            verbose: false,
            tcp_nodelay: true,
        }
    }
}

impl RelayConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the frame separator
    pub fn separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    /// Broadcast full frames instead of filtering by model
    pub fn unfiltered(mut self, unfiltered: bool) -> Self {
        self.unfiltered = unfiltered;
        self
    }

    /// Log per-frame activity
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set TCP_NODELAY on accepted sockets
    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// The separator as a byte
    ///
    /// Fails if the separator takes more than one byte in UTF-8.
    pub fn separator_byte(&self) -> Result<u8> {
        if self.separator.len_utf8() != 1 {
            return Err(Error::InvalidSeparator(self.separator));
        }
        Ok(self.separator as u8)
    }
}
