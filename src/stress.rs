//! Fast-producer / slow-consumer stress mode
//!
//! One client floods PRIVMSGs at a sustained rate while a second client
//! shrinks its kernel receive buffer and reads slowly, forcing the server
//! to deal with backpressure. This exercises the server, not the engine,
//! but the flooder runs through the ordinary session layer on purpose: the
//! session abstraction has to stay correct under exactly this pattern.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::common::{Config, Error, Result};
use crate::pattern::Pattern;
use crate::session::SessionSet;
use crate::transport::TcpTransport;

const PAYLOAD_LEN: usize = 400;
const RECV_BUFFER: usize = 4096;

/// Knobs for one stress run
pub struct StressOpts {
    /// Stop after this many messages even if the server keeps up
    pub messages: u64,
    /// Nickname of the slow consumer the flood is aimed at
    pub target: String,
}

impl Default for StressOpts {
    fn default() -> Self {
        Self {
            messages: 100_000,
            target: "bob".to_string(),
        }
    }
}

/// What happened during a stress run
#[derive(Debug)]
pub struct StressReport {
    pub messages_sent: u64,
    /// The flooder saw the no-such-nick numeric, meaning the server dropped
    /// the slow consumer under load
    pub target_vanished: bool,
    pub bytes_read: u64,
}

/// Run the flooder and the slow consumer against the configured server
pub async fn run(config: &Config, opts: &StressOpts) -> Result<StressReport> {
    let addr = config.server_addr();
    let (flood, slow) = tokio::join!(
        flooder(config, &addr, opts),
        slow_consumer(config, &addr, &opts.target)
    );
    let (messages_sent, target_vanished) = flood?;
    let bytes_read = slow?;
    Ok(StressReport {
        messages_sent,
        target_vanished,
        bytes_read,
    })
}

async fn flooder(config: &Config, addr: &str, opts: &StressOpts) -> Result<(u64, bool)> {
    let transport = TcpTransport::new(addr);
    let mut sessions = SessionSet::new(
        config.timeouts.poll_interval(),
        config.timeouts.connect(),
    );
    sessions.connect("alice", &transport).await?;
    sessions
        .send("alice", &format!("PASS {}", config.server.password))
        .await?;
    sessions.send("alice", "NICK alice").await?;
    sessions.send("alice", "USER alice 0 * :alice").await?;
    if !sessions
        .await_match(
            "alice",
            &Pattern::Literal(" 001 ".into()),
            config.timeouts.await_default(),
        )
        .await?
    {
        tracing::warn!("flooder saw no welcome, flooding anyway");
    }

    // Give the slow reader time to finish its own registration
    tokio::time::sleep(Duration::from_secs(1)).await;

    let no_such_nick = Pattern::Literal(" 401 ".into());
    let line = format!("PRIVMSG {} :{}", opts.target, "A".repeat(PAYLOAD_LEN));
    let mut sent = 0u64;
    let mut target_vanished = false;

    while sent < opts.messages {
        if sessions.send("alice", &line).await.is_err() {
            tracing::info!(sent, "flooder disconnected by server");
            break;
        }
        sent += 1;
        if sessions.log_contains("alice", &no_such_nick)? {
            tracing::info!(sent, "flood target vanished, stopping");
            target_vanished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    sessions.disconnect_all().await;
    Ok((sent, target_vanished))
}

async fn slow_consumer(config: &Config, addr: &str, nick: &str) -> Result<u64> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::connect(nick, e))?;
    #[cfg(unix)]
    shrink_recv_buffer(&stream);

    let (mut reader, mut writer) = stream.into_split();
    let registration = format!(
        "PASS {}\r\nNICK {}\r\nUSER {} 0 * :{}\r\n",
        config.server.password, nick, nick, nick
    );
    writer
        .write_all(registration.as_bytes())
        .await
        .map_err(|e| Error::send(nick, e))?;

    let mut buf = [0u8; RECV_BUFFER];
    let mut total = 0u64;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::info!(nick, total, "slow consumer dropped by server");
                break;
            }
            Ok(n) => {
                total += n as u64;
                // Reading slowly is the whole point
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(err) => {
                tracing::info!(nick, total, error = %err, "slow consumer connection reset");
                break;
            }
        }
    }
    Ok(total)
}

#[cfg(unix)]
fn shrink_recv_buffer(stream: &TcpStream) {
    use std::os::unix::io::AsRawFd;

    let size: libc::c_int = RECV_BUFFER as libc::c_int;
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &size as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        tracing::warn!("failed to shrink receive buffer");
    }
}
