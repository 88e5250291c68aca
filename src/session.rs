//! Client sessions and the active-session set
//!
//! A session owns one simulated client's duplex stream, a background drain
//! task, and an append-only log of received lines. The drain task is the
//! only writer to the log and the orchestration flow the only reader; both
//! sides take the guard per operation and never hold it across a sleep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::common::{Error, Result};
use crate::pattern::Pattern;
use crate::transport::{BoxedWriter, Duplex, Transport};

/// Lines kept when reporting a timed-out expectation
pub const TAIL_LINES: usize = 5;

fn lock_lines(log: &Mutex<Vec<String>>) -> MutexGuard<'_, Vec<String>> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A live simulated client: stream, drain task, received-line history
pub struct ClientSession {
    role: String,
    writer: BoxedWriter,
    log: Arc<Mutex<Vec<String>>>,
    alive: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    drain: Option<JoinHandle<()>>,
    proxy: Option<Child>,
}

impl ClientSession {
    /// Wrap a freshly opened stream and start its drain task
    fn spawn(role: String, duplex: Duplex) -> Self {
        let log = Arc::new(Mutex::new(Vec::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let drain_log = Arc::clone(&log);
        let drain_alive = Arc::clone(&alive);
        let drain_role = role.clone();
        let mut lines = BufReader::new(duplex.reader).lines();

        let drain = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => {
                            let line = line.trim_end_matches('\r').to_string();
                            tracing::trace!(role = %drain_role, %line, "recv");
                            lock_lines(&drain_log).push(line);
                        }
                        // EOF and read errors both mean the peer is gone;
                        // disconnection by design is not a failure
                        Ok(None) => break,
                        Err(err) => {
                            tracing::debug!(role = %drain_role, error = %err, "read ended");
                            break;
                        }
                    }
                }
            }
            drain_alive.store(false, Ordering::SeqCst);
        });

        Self {
            role,
            writer: duplex.writer,
            log,
            alive,
            shutdown: Some(shutdown_tx),
            drain: Some(drain),
            proxy: duplex.proxy,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Snapshot of every line received so far
    pub fn lines(&self) -> Vec<String> {
        lock_lines(&self.log).clone()
    }

    pub fn line_count(&self) -> usize {
        lock_lines(&self.log).len()
    }

    /// The last `n` received lines
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = lock_lines(&self.log);
        let start = lines.len().saturating_sub(n);
        lines[start..].to_vec()
    }

    async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await
    }

    /// Tear the session down: stop the drain task, close the stream, kill
    /// the proxy process if one backs it
    async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.writer.shutdown().await;
        if let Some(mut proxy) = self.proxy.take() {
            if let Err(err) = proxy.start_kill() {
                tracing::warn!(role = %self.role, error = %err, "failed to kill proxy");
            }
        }
        if let Some(handle) = self.drain.take() {
            let _ = handle.await;
        }
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// The set of live sessions, keyed by role
///
/// Connect, disconnect and send-failure removal all happen on the single
/// sequential orchestration flow; `&mut self` enforces exclusive access to
/// the map itself.
pub struct SessionSet {
    active: HashMap<String, ClientSession>,
    poll_interval: Duration,
    connect_timeout: Duration,
}

impl SessionSet {
    pub fn new(poll_interval: Duration, connect_timeout: Duration) -> Self {
        Self {
            active: HashMap::new(),
            poll_interval,
            connect_timeout,
        }
    }

    pub fn contains(&self, role: &str) -> bool {
        self.active.contains_key(role)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn get(&self, role: &str) -> Option<&ClientSession> {
        self.active.get(role)
    }

    /// Open a session for `role` through `transport`.
    ///
    /// A role maps to at most one live session; connecting a role that is
    /// already live fails. A dead leftover (peer hung up but the role was
    /// never disconnected) is retired first so the role can be reused.
    pub async fn connect(&mut self, role: &str, transport: &dyn Transport) -> Result<()> {
        if let Some(existing) = self.active.get(role) {
            if existing.is_alive() {
                return Err(Error::AlreadyConnected(role.to_string()));
            }
            if let Some(old) = self.active.remove(role) {
                old.close().await;
            }
        }

        let duplex = tokio::time::timeout(self.connect_timeout, transport.open(role))
            .await
            .map_err(|_| Error::connect(role, "connect timed out"))??;

        tracing::debug!(role, "client connected");
        self.active
            .insert(role.to_string(), ClientSession::spawn(role.to_string(), duplex));
        Ok(())
    }

    /// Send one newline-terminated command through `role`.
    ///
    /// A write failure marks the session dead and removes it from the set;
    /// the caller treats that as a step failure, not a crash.
    pub async fn send(&mut self, role: &str, line: &str) -> Result<()> {
        let session = self
            .active
            .get_mut(role)
            .ok_or_else(|| Error::send(role, "not connected"))?;

        if !session.is_alive() {
            if let Some(old) = self.active.remove(role) {
                old.close().await;
            }
            return Err(Error::send(role, "connection closed by peer"));
        }

        tracing::debug!(role, %line, "send");
        if let Err(err) = session.send_line(line).await {
            let reason = err.to_string();
            if let Some(old) = self.active.remove(role) {
                old.close().await;
            }
            return Err(Error::send(role, reason));
        }
        Ok(())
    }

    /// Poll `role`'s log until a line matches `pattern` or `timeout` elapses.
    ///
    /// Scans the full history, so a pattern satisfied before the call still
    /// counts. Returns false immediately when the role is absent or its
    /// session died while waiting; otherwise returns within one poll
    /// interval of the deadline.
    pub async fn await_match(
        &self,
        role: &str,
        pattern: &Pattern,
        timeout: Duration,
    ) -> Result<bool> {
        let regex = pattern.compile()?;
        let Some(session) = self.active.get(role) else {
            return Ok(false);
        };
        let log = Arc::clone(&session.log);
        let alive = Arc::clone(&session.alive);

        let deadline = tokio::time::Instant::now() + timeout;
        let mut scanned = 0usize;
        loop {
            // Read liveness before scanning so lines appended up to the
            // moment of death are still considered.
            let dead = !alive.load(Ordering::SeqCst);
            {
                let lines = lock_lines(&log);
                if lines[scanned..].iter().any(|l| regex.is_match(l)) {
                    return Ok(true);
                }
                scanned = lines.len();
            }
            if dead {
                tracing::warn!(role, %pattern, "session closed while waiting");
                return Ok(false);
            }
            if tokio::time::Instant::now() >= deadline {
                let tail = self.tail(role, TAIL_LINES);
                tracing::warn!(role, %pattern, ?tail, "no match before deadline");
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One-shot scan of `role`'s full history for `pattern`
    pub fn log_contains(&self, role: &str, pattern: &Pattern) -> Result<bool> {
        let regex = pattern.compile()?;
        Ok(self
            .active
            .get(role)
            .map(|session| lock_lines(&session.log).iter().any(|l| regex.is_match(l)))
            .unwrap_or(false))
    }

    /// The last `n` lines received by `role`, for diagnostics
    pub fn tail(&self, role: &str, n: usize) -> Vec<String> {
        self.active
            .get(role)
            .map(|session| session.tail(n))
            .unwrap_or_default()
    }

    /// Close and remove `role`. Idempotent: unknown roles return false.
    pub async fn disconnect(&mut self, role: &str) -> bool {
        match self.active.remove(role) {
            Some(session) => {
                tracing::debug!(role, "client disconnected");
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// Close every live session; used for case cleanup and suite teardown
    pub async fn disconnect_all(&mut self) {
        let roles: Vec<String> = self.active.keys().cloned().collect();
        for role in roles {
            self.disconnect(&role).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Instant;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    /// In-memory transport; each open() hands the server end to the test
    struct MemTransport {
        peers: Mutex<Vec<DuplexStream>>,
    }

    impl MemTransport {
        fn new() -> Self {
            Self {
                peers: Mutex::new(Vec::new()),
            }
        }

        fn take_peer(&self) -> DuplexStream {
            self.peers.lock().unwrap().remove(0)
        }
    }

    #[async_trait]
    impl Transport for MemTransport {
        async fn open(&self, _role: &str) -> Result<Duplex> {
            let (client, server) = tokio::io::duplex(4096);
            self.peers.lock().unwrap().push(server);
            let (reader, writer) = tokio::io::split(client);
            Ok(Duplex {
                reader: Box::new(reader),
                writer: Box::new(writer),
                proxy: None,
            })
        }
    }

    fn session_set() -> SessionSet {
        SessionSet::new(Duration::from_millis(10), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn duplicate_connect_is_rejected() {
        let transport = MemTransport::new();
        let mut sessions = session_set();
        sessions.connect("alice", &transport).await.unwrap();
        let err = sessions.connect("alice", &transport).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyConnected(_)));
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn log_grows_monotonically_in_order() {
        let transport = MemTransport::new();
        let mut sessions = session_set();
        sessions.connect("alice", &transport).await.unwrap();
        let mut peer = transport.take_peer();

        peer.write_all(b"first\r\nsecond\r\n").await.unwrap();
        assert!(sessions
            .await_match("alice", &Pattern::Literal("second".into()), Duration::from_secs(1))
            .await
            .unwrap());

        let before = sessions.get("alice").unwrap().line_count();
        peer.write_all(b"third\r\n").await.unwrap();
        assert!(sessions
            .await_match("alice", &Pattern::Literal("third".into()), Duration::from_secs(1))
            .await
            .unwrap());

        let lines = sessions.get("alice").unwrap().lines();
        assert!(lines.len() >= before);
        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn await_match_sees_lines_received_before_the_call() {
        let transport = MemTransport::new();
        let mut sessions = session_set();
        sessions.connect("alice", &transport).await.unwrap();
        let mut peer = transport.take_peer();

        peer.write_all(b":server 001 alice :Welcome\r\n").await.unwrap();
        assert!(sessions
            .await_match("alice", &Pattern::Literal(" 001 ".into()), Duration::from_secs(1))
            .await
            .unwrap());
        // Satisfied earlier still counts when checked again
        assert!(sessions
            .await_match("alice", &Pattern::Literal(" 001 ".into()), Duration::from_millis(50))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn await_match_times_out_within_a_poll_interval() {
        let transport = MemTransport::new();
        let mut sessions = session_set();
        sessions.connect("alice", &transport).await.unwrap();
        let _peer = transport.take_peer();

        let start = Instant::now();
        let matched = sessions
            .await_match("alice", &Pattern::Literal("never".into()), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(!matched);
        // timeout plus at most one poll interval, with scheduling slack
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn await_match_fails_fast_when_peer_hangs_up() {
        let transport = MemTransport::new();
        let mut sessions = session_set();
        sessions.connect("alice", &transport).await.unwrap();
        drop(transport.take_peer());

        let start = Instant::now();
        let matched = sessions
            .await_match("alice", &Pattern::Literal("never".into()), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(!matched);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn await_match_on_unknown_role_returns_false_immediately() {
        let sessions = session_set();
        let matched = sessions
            .await_match("ghost", &Pattern::Literal("x".into()), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(!matched);
    }

    #[tokio::test]
    async fn send_after_peer_hangup_marks_session_dead() {
        let transport = MemTransport::new();
        let mut sessions = session_set();
        sessions.connect("alice", &transport).await.unwrap();
        drop(transport.take_peer());

        // Let the drain task observe the closed stream
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = sessions.send("alice", "PING").await.unwrap_err();
        assert!(matches!(err, Error::Send { .. }));
        assert!(!sessions.contains("alice"));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let transport = MemTransport::new();
        let mut sessions = session_set();
        sessions.connect("alice", &transport).await.unwrap();

        assert!(sessions.disconnect("alice").await);
        assert!(!sessions.disconnect("alice").await);
        assert!(!sessions.disconnect("nobody").await);
        assert_eq!(sessions.len(), 0);
    }

    #[tokio::test]
    async fn dead_role_can_reconnect() {
        let transport = MemTransport::new();
        let mut sessions = session_set();
        sessions.connect("alice", &transport).await.unwrap();
        drop(transport.take_peer());
        tokio::time::sleep(Duration::from_millis(50)).await;

        sessions.connect("alice", &transport).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions.get("alice").unwrap().is_alive());
    }
}
