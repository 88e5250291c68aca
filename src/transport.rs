//! Client transports
//!
//! The engine never touches a socket directly; each simulated client is
//! driven through an abstract duplex text stream. A transport produces that
//! stream: either a TCP connection to the server's listening port, or the
//! stdin/stdout of a locally spawned proxy command.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use crate::common::{Error, Result};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected duplex text stream plus whatever must be torn down with it
pub struct Duplex {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    /// Proxy process backing the stream, if any; killed on disconnect
    pub proxy: Option<Child>,
}

/// Produces one duplex stream per client connection
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, role: &str) -> Result<Duplex>;
}

/// Direct TCP connection to the server under test
pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self, role: &str) -> Result<Duplex> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::connect(role, format!("{}: {}", self.addr, e)))?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Ok(Duplex {
            reader: Box::new(reader),
            writer: Box::new(writer),
            proxy: None,
        })
    }
}

/// Pipe to a locally spawned proxy command (e.g. `nc localhost 6667`)
pub struct PipeTransport {
    command: String,
    args: Vec<String>,
}

impl PipeTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl Transport for PipeTransport {
    async fn open(&self, role: &str) -> Result<Duplex> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::connect(role, format!("{}: {}", self.command, e)))?;

        let writer = child
            .stdin
            .take()
            .ok_or_else(|| Error::connect(role, "proxy has no stdin"))?;
        let reader = child
            .stdout
            .take()
            .ok_or_else(|| Error::connect(role, "proxy has no stdout"))?;

        Ok(Duplex {
            reader: Box::new(reader),
            writer: Box::new(writer),
            proxy: Some(child),
        })
    }
}
