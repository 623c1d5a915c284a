//! Connection registry (spec.md §4.C).

use std::collections::HashMap;
use std::time::Instant;

use mio::net::TcpStream;
use mio::{Interest, Token};

/// A live peer, from raw TCP accept through WS upgrade to teardown.
pub struct Client {
    pub id: u64,
    pub socket: TcpStream,
    pub token: Token,
    pub upgraded: bool,
    pub closed: bool,
    pub read_buf: Vec<u8>,
    pub close_sent: bool,
    pub last_activity: Instant,
}

impl Client {
    fn new(id: u64, socket: TcpStream, token: Token) -> Self {
        Self {
            id,
            socket,
            token,
            upgraded: false,
            closed: false,
            read_buf: Vec::new(),
            close_sent: false,
            last_activity: Instant::now(),
        }
    }
}

/// Owns every live [`Client`] and assigns monotonic ids.
///
/// The registry exclusively owns each client's socket; the event loop
/// only ever borrows it for the duration of one poll iteration
/// (spec.md §4.C "Ownership").
pub struct Registry {
    clients: HashMap<u64, Client>,
    tokens: HashMap<Token, u64>,
    next_id: u64,
    next_token: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            tokens: HashMap::new(),
            // Token 0 is reserved for the listening socket.
            next_token: 1,
            next_id: 1,
        }
    }

    /// Register `socket` with `registry`, allocate the next client id,
    /// and insert a new [`Client`]. Returns the assigned id.
    pub fn insert(&mut self, mut socket: TcpStream, poll_registry: &mio::Registry) -> std::io::Result<u64> {
        let id = self.next_id;
        self.next_id += 1;
        let token = Token(self.next_token);
        self.next_token += 1;

        poll_registry.register(&mut socket, token, Interest::READABLE)?;

        self.clients.insert(id, Client::new(id, socket, token));
        self.tokens.insert(token, id);
        Ok(id)
    }

    pub fn get(&self, id: u64) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    pub fn id_for_token(&self, token: Token) -> Option<u64> {
        self.tokens.get(&token).copied()
    }

    /// Remove and return a client, deregistering its socket.
    pub fn remove(&mut self, id: u64, poll_registry: &mio::Registry) -> Option<Client> {
        let mut client = self.clients.remove(&id)?;
        self.tokens.remove(&client.token);
        let _ = poll_registry.deregister(&mut client.socket);
        Some(client)
    }

    /// All upgraded, not-yet-closed clients, for broadcast.
    pub fn iter_upgraded(&mut self) -> impl Iterator<Item = &mut Client> {
        self.clients
            .values_mut()
            .filter(|c| c.upgraded && !c.closed)
    }

    pub fn ids_upgraded(&self) -> Vec<u64> {
        self.clients
            .values()
            .filter(|c| c.upgraded && !c.closed)
            .map(|c| c.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
