//! A NETCONF session over any byte stream pair
//!
//! A reader thread decodes incoming frames into a channel. Requests are
//! written from the calling thread and wait on the channel with a timeout,
//! so a silent device costs one timeout instead of a hung worker.

use crate::error::{Error, Result};
use crate::framing::{Decoder, Framing};
use crate::rpc;
use deploykit::{Datastore, ProtocolError, RenderedConfig, RpcReply, Session};
use std::io::{self, Read, Write};
use std::process::Child;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on waiting for the close-session reply
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type Incoming = Result<String>;

pub struct NetconfSession {
    device: String,
    writer: Box<dyn Write + Send>,
    incoming: Receiver<Incoming>,
    framing: Framing,
    next_id: u64,
    rpc_timeout: Duration,
    session_id: Option<String>,
    child: Option<Child>,
    closed: bool,
}

impl NetconfSession {
    /// Exchange hellos over an open byte stream
    ///
    /// `hello_timeout` bounds the wait for the server hello; `rpc_timeout`
    /// bounds every later request.
    pub fn establish<R, W>(
        device: &str,
        reader: R,
        writer: W,
        hello_timeout: Duration,
        rpc_timeout: Duration,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, incoming) = mpsc::channel();
        thread::Builder::new()
            .name(format!("netconf-reader-{device}"))
            .spawn(move || read_frames(reader, &tx))?;

        let mut session = Self {
            device: device.to_string(),
            writer: Box::new(writer),
            incoming,
            framing: Framing::EndOfMessage,
            next_id: 1,
            rpc_timeout,
            session_id: None,
            child: None,
            closed: false,
        };

        if let Err(e) = session.exchange_hellos(hello_timeout) {
            // Nothing was established, so there is nothing to close
            session.closed = true;
            return Err(e);
        }
        log::debug!(
            "{}: session {} established ({:?} framing)",
            session.device,
            session.session_id.as_deref().unwrap_or("?"),
            session.framing
        );

        Ok(session)
    }

    fn exchange_hellos(&mut self, timeout: Duration) -> Result<()> {
        self.send(&rpc::client_hello())?;
        let hello = self.receive(Instant::now() + timeout, timeout)?;
        if !hello.contains("hello") || rpc::capabilities(&hello).is_empty() {
            return Err(Error::Malformed("server did not send a hello".into()));
        }

        self.session_id = rpc::session_id(&hello);
        if rpc::supports_chunked(&hello) {
            self.framing = Framing::Chunked;
        }
        Ok(())
    }

    /// Tie a subprocess to the session; it is killed and reaped on close
    pub fn attach_child(&mut self, child: Child) {
        self.child = Some(child);
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send one operation and wait for its reply
    pub fn rpc(&mut self, operation: &str) -> Result<RpcReply> {
        self.rpc_within(operation, self.rpc_timeout)
    }

    fn rpc_within(&mut self, operation: &str, timeout: Duration) -> Result<RpcReply> {
        if self.closed {
            return Err(Error::Closed("session already closed".into()));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.send(&rpc::wrap_rpc(id, operation))?;

        let deadline = Instant::now() + timeout;
        loop {
            let message = self.receive(deadline, timeout)?;
            match rpc::parse_reply(&message, id)? {
                Some(reply) => return Ok(reply),
                None => log::debug!("{}: discarding reply to an earlier request", self.device),
            }
        }
    }

    fn send(&mut self, message: &str) -> Result<()> {
        self.writer.write_all(&self.framing.encode(message))?;
        self.writer.flush()?;
        Ok(())
    }

    fn receive(&self, deadline: Instant, timeout: Duration) -> Result<String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.incoming.recv_timeout(remaining) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout {
                secs: timeout.as_secs(),
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Closed("reader stopped".into()))
            }
        }
    }

    /// Close the session
    ///
    /// Sends `<close-session/>` if the transport still works, then drops
    /// the stream and reaps the subprocess. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        let timeout = self.rpc_timeout.min(CLOSE_TIMEOUT);
        if let Err(e) = self.rpc_within(&rpc::close_session(), timeout) {
            log::debug!("{}: close-session not acknowledged: {e}", self.device);
        }
        self.closed = true;

        // Dropping the writer sends EOF to the peer
        self.writer = Box::new(io::sink());

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                log::debug!("{}: kill: {e}", self.device);
            }
            if let Err(e) = child.wait() {
                log::debug!("{}: wait: {e}", self.device);
            }
        }
        log::debug!("{}: session closed", self.device);
    }
}

impl Drop for NetconfSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl Session for NetconfSession {
    fn lock(&mut self, datastore: Datastore) -> std::result::Result<RpcReply, ProtocolError> {
        Ok(self.rpc(&rpc::lock(datastore))?)
    }

    fn push(
        &mut self,
        datastore: Datastore,
        config: &RenderedConfig,
    ) -> std::result::Result<RpcReply, ProtocolError> {
        Ok(self.rpc(&rpc::edit_config(datastore, config.as_str()))?)
    }

    fn commit(&mut self) -> std::result::Result<RpcReply, ProtocolError> {
        Ok(self.rpc(&rpc::commit())?)
    }

    fn unlock(&mut self, datastore: Datastore) -> std::result::Result<RpcReply, ProtocolError> {
        Ok(self.rpc(&rpc::unlock(datastore))?)
    }

    fn close(&mut self) {
        Self::close(self);
    }
}

/// Reader thread body: decode frames until the stream ends
///
/// The first message is the peer's hello. When it advertises base:1.1 the
/// decoder switches to chunked framing for everything after it.
fn read_frames<R: Read>(mut reader: R, tx: &Sender<Incoming>) {
    let mut decoder = Decoder::new(Framing::EndOfMessage);
    let mut hello_seen = false;
    let mut buf = [0u8; 8192];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(Err(Error::Closed("peer closed the stream".into())));
                return;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(Err(Error::Io(e)));
                return;
            }
        };
        decoder.push(&buf[..n]);

        loop {
            match decoder.next_message() {
                Ok(Some(message)) => {
                    if !hello_seen {
                        hello_seen = true;
                        if rpc::supports_chunked(&message) {
                            decoder.set_framing(Framing::Chunked);
                        }
                    }
                    if tx.send(Ok(message)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            }
        }
    }
}
