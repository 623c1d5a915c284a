//! Event loop and application API (spec.md §4.D, §4.F).
//!
//! Single-threaded and poll-driven: one `mio::Poll` multiplexes the
//! listening socket with every client socket, and `accept()` drains a
//! small internal queue of high-level events built up by each poll cycle
//! (spec.md §4.D steps 1-8).

use std::collections::VecDeque;
use std::io::{self, Read};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::frame::{self, write_all_blocking};
use crate::handshake;
use crate::registry::Registry;
use crate::static_files;

const LISTENER_TOKEN: Token = Token(0);

pub struct Server {
    config: Config,
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    registry: Registry,
    queue: VecDeque<Event>,
    running: bool,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            poll: Poll::new().expect("failed to create OS poll instance"),
            events: Events::with_capacity(1024),
            listener: None,
            registry: Registry::new(),
            queue: VecDeque::new(),
            running: false,
        }
    }

    /// Bind the listening socket. Idempotent failure: calling this twice
    /// returns `Error::AlreadyListening` rather than rebinding.
    pub fn listen(&mut self) -> Result<()> {
        if self.listener.is_some() {
            return Err(Error::AlreadyListening);
        }
        if self.config.port == 0 {
            return Err(Error::InvalidPort(self.config.port));
        }
        let addr = format!("0.0.0.0:{}", self.config.port)
            .parse()
            .map_err(|_| Error::InvalidPort(self.config.port))?;
        let mut listener = TcpListener::bind(addr)?;
        self.poll
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        self.listener = Some(listener);
        self.running = true;
        info!("listening on port {}", self.config.port);
        Ok(())
    }

    /// Drive the event loop until exactly one high-level event is ready.
    pub fn accept(&mut self) -> Event {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return event;
            }
            if !self.running {
                return Event::Shutdown;
            }
            self.poll_once();
        }
    }

    pub fn send(&mut self, id: u64, text: &str) -> Result<()> {
        let client = self.registry.get_mut(id).ok_or(Error::UnknownClient(id))?;
        if client.closed || !client.upgraded {
            return Err(Error::ClientClosed(id));
        }
        frame::write_frame(&mut client.socket, frame::OPCODE_TEXT, text.as_bytes())?;
        Ok(())
    }

    /// Send `text` to every currently upgraded client, sender included
    /// (spec.md §9 Open Questions preserves this behavior). Per-client
    /// write failures are swallowed into an eviction, not returned.
    pub fn broadcast(&mut self, text: &str) -> Result<()> {
        let payload = text.as_bytes();
        let mut failed = Vec::new();
        for client in self.registry.iter_upgraded() {
            if frame::write_frame(&mut client.socket, frame::OPCODE_TEXT, payload).is_err() {
                failed.push(client.id);
            }
        }
        for id in failed {
            warn!("broadcast write failed for client {id}, evicting");
            self.teardown(id, None);
        }
        Ok(())
    }

    /// Idempotent: closing an absent or already-closed client is a no-op.
    pub fn close(&mut self, id: u64) {
        if self.registry.get(id).is_some() {
            self.teardown(id, None);
        }
    }

    /// Clear the running flag; the loop observes it at the next poll
    /// wake-up and `accept()` returns `Event::Shutdown`.
    pub fn shutdown(&mut self) {
        self.running = false;
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    fn poll_once(&mut self) {
        let timeout = Duration::from_millis(self.config.poll_timeout_ms);
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return,
            Err(e) => {
                error!("poll failed: {e}");
                self.queue.push_back(Event::Error(format!("poll failed: {e}")));
                self.running = false;
                return;
            }
        }

        let mut listener_ready = false;
        let mut client_tokens: Vec<Token> = Vec::new();
        for event in self.events.iter() {
            if event.token() == LISTENER_TOKEN {
                listener_ready = true;
            } else {
                client_tokens.push(event.token());
            }
        }

        // New connections first (spec.md §4.D tie-break), in listener
        // accept order.
        if listener_ready {
            self.accept_new_connections();
        }

        // Ids, not raw poll-event order: a single accept-order-assigned id
        // space gives a deterministic, stable per-cycle iteration order
        // (spec.md §4.C "iteration order unspecified but stable").
        let mut ids: Vec<u64> = client_tokens
            .into_iter()
            .filter_map(|t| self.registry.id_for_token(t))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        for id in ids {
            self.service_client(id);
        }

        self.evict_idle_clients();
    }

    fn accept_new_connections(&mut self) {
        loop {
            let listener = self.listener.as_mut().expect("listener must be bound to poll");
            match listener.accept() {
                Ok((socket, addr)) => {
                    debug!("accepted connection from {addr}");
                    self.handshake_new_connection(socket);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {e}");
                    self.queue.push_back(Event::Error(format!("accept failed: {e}")));
                    break;
                }
            }
        }
    }

    /// Runs the HTTP/WS-upgrade handshake for a freshly accepted socket.
    ///
    /// This holds the single event-loop thread for the duration of the
    /// handshake read, matching spec.md §5's acknowledgment that "a read
    /// that blocks on a slow peer will hold the loop" — the handshake is
    /// a single small request, so this is bounded in practice and kept
    /// synchronous rather than turned into another buffered state machine.
    fn handshake_new_connection(&mut self, mut socket: TcpStream) {
        let _ = socket.set_nodelay(true);
        match blocking_read_request(&mut socket) {
            Ok((req, leftover)) => self.dispatch_request(socket, &req, leftover),
            Err(e) => {
                warn!("handshake failed: {e}");
                self.queue.push_back(Event::Error(format!("handshake failed: {e}")));
            }
        }
    }

    fn dispatch_request(&mut self, mut socket: TcpStream, req: &handshake::Request, leftover: Vec<u8>) {
        match handshake::dispose(req) {
            handshake::Disposition::Upgrade { accept } => {
                let response = handshake::switching_protocols_response(&accept);
                if let Err(e) = write_all_blocking(&mut socket, &response) {
                    warn!("failed writing upgrade response: {e}");
                    return;
                }
                match self.registry.insert(socket, self.poll.registry()) {
                    Ok(id) => {
                        if let Some(client) = self.registry.get_mut(id) {
                            client.upgraded = true;
                            client.read_buf = leftover;
                            client.last_activity = Instant::now();
                        }
                        debug!("client {id} upgraded");
                        self.queue.push_back(Event::Connected(id));
                    }
                    Err(e) => warn!("failed registering client socket: {e}"),
                }
            }
            handshake::Disposition::Static { path } => {
                let response = static_files::respond(&self.config.static_root, &path);
                let _ = write_all_blocking(&mut socket, &response);
            }
            handshake::Disposition::Reject { reason } => {
                warn!("rejecting handshake: {reason}");
                let _ = write_all_blocking(&mut socket, &handshake::bad_request(&reason));
                self.queue.push_back(Event::Error(reason));
            }
        }
    }

    fn service_client(&mut self, id: u64) {
        if !self.drain_socket(id) {
            return;
        }
        self.drain_frames(id);
    }

    /// Reads every available byte for `id` into its buffer. Returns
    /// `false` if the client was torn down (EOF or I/O error) during the
    /// read, in which case the caller must stop processing it.
    fn drain_socket(&mut self, id: u64) -> bool {
        let mut chunk = [0u8; 4096];
        loop {
            let Some(client) = self.registry.get_mut(id) else {
                return false;
            };
            match client.socket.read(&mut chunk) {
                Ok(0) => {
                    self.teardown(id, None);
                    return false;
                }
                Ok(n) => {
                    client.read_buf.extend_from_slice(&chunk[..n]);
                    client.last_activity = Instant::now();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("client {id} read error: {e}");
                    self.teardown(id, Some(format!("read error: {e}")));
                    return false;
                }
            }
        }
    }

    fn drain_frames(&mut self, id: u64) {
        loop {
            let Some(client) = self.registry.get(id) else { return };
            let max_payload = self.config.max_payload;
            match frame::try_parse(&client.read_buf, max_payload) {
                Ok(None) => return,
                Ok(Some((parsed, consumed))) => {
                    self.registry.get_mut(id).unwrap().read_buf.drain(..consumed);
                    if !self.handle_frame(id, parsed) {
                        return;
                    }
                }
                Err(e) => {
                    warn!("client {id} protocol error: {e}");
                    self.teardown(id, Some(e.to_string()));
                    return;
                }
            }
        }
    }

    /// Returns `false` if the client was torn down and the caller should
    /// stop draining frames for it.
    fn handle_frame(&mut self, id: u64, parsed: frame::Frame) -> bool {
        match parsed {
            frame::Frame::Text(text) => {
                self.queue.push_back(Event::Message(id, text));
                true
            }
            frame::Frame::Ping(payload) => {
                let client = self.registry.get_mut(id).unwrap();
                if let Err(e) = frame::write_frame(&mut client.socket, frame::OPCODE_PONG, &payload) {
                    warn!("client {id} pong write failed: {e}");
                    self.teardown(id, Some(format!("write error: {e}")));
                    return false;
                }
                true
            }
            frame::Frame::Pong(_) => true,
            frame::Frame::Close => {
                let client = self.registry.get_mut(id).unwrap();
                if !client.close_sent {
                    let _ = frame::write_frame(&mut client.socket, frame::OPCODE_CLOSE, &[]);
                    client.close_sent = true;
                }
                self.teardown(id, None);
                false
            }
        }
    }

    fn teardown(&mut self, id: u64, error: Option<String>) {
        let was_upgraded = self.registry.get(id).map(|c| c.upgraded).unwrap_or(false);
        self.registry.remove(id, self.poll.registry());
        if let Some(reason) = error {
            self.queue.push_back(Event::Error(reason));
        }
        if was_upgraded {
            debug!("client {id} disconnected");
            self.queue.push_back(Event::Disconnected(id));
        }
    }

    fn evict_idle_clients(&mut self) {
        let timeout = Duration::from_secs(self.config.read_timeout_secs);
        let now = Instant::now();
        let stale: Vec<u64> = self
            .registry
            .ids_upgraded()
            .into_iter()
            .filter(|&id| {
                self.registry
                    .get(id)
                    .map(|c| now.duration_since(c.last_activity) > timeout)
                    .unwrap_or(false)
            })
            .collect();
        for id in stale {
            warn!("client {id} idle timeout");
            self.teardown(id, None);
        }
    }
}

/// Read exactly one HTTP request, spin-retrying on `WouldBlock` the way a
/// blocking socket would, bounded by a short deadline so a client that
/// never finishes its request line cannot wedge the event loop forever.
fn blocking_read_request(socket: &mut TcpStream) -> Result<(handshake::Request, Vec<u8>)> {
    const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(5);
    let deadline = Instant::now() + HANDSHAKE_DEADLINE;
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk) {
            Ok(0) => {
                return Err(Error::Protocol("connection closed during handshake".into()))
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if let Some((req, consumed)) = handshake::try_parse_request(&buf)? {
                    let leftover = buf[consumed..].to_vec();
                    return Ok((req, leftover));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() > deadline {
                    return Err(Error::Protocol("handshake timed out".into()));
                }
                std::thread::yield_now();
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
}
