//! Idle-expiring pool of logged-in connections.
//!
//! A lease hands its connection back when dropped. A connection found
//! disconnected is dropped instead, and every idle connection of the same
//! pool goes with it: they were opened against the same server and are
//! presumed dead as well.

use super::{Client, Endpoint};
use crate::error::Result;
use log::debug;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Pool {
    name: &'static str,
    endpoint: Arc<Endpoint>,
    idle_ttl: Duration,
    idle: Mutex<Vec<(Instant, Client)>>,
}

impl Pool {
    pub fn new(name: &'static str, endpoint: Arc<Endpoint>, idle_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            endpoint,
            idle_ttl,
            idle: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Live idle connections (expired ones are not counted).
    pub fn idle_count(&self) -> usize {
        let ttl = self.idle_ttl;
        self.idle
            .lock()
            .iter()
            .filter(|(since, _)| since.elapsed() < ttl)
            .count()
    }

    /// Borrow an idle connection or open a new one.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledClient> {
        if let Some(client) = self.take_idle() {
            return Ok(PooledClient::new(client, self.clone()));
        }
        debug!("{} pool: opening connection to {}:{}", self.name, self.endpoint.host, self.endpoint.port);
        let client = self.endpoint.connect().await?;
        Ok(PooledClient::new(client, self.clone()))
    }

    fn take_idle(&self) -> Option<Client> {
        let mut idle = self.idle.lock();
        let ttl = self.idle_ttl;
        idle.retain(|(since, client)| since.elapsed() < ttl && client.is_connected());
        // Most recently returned first
        idle.pop().map(|(_, client)| client)
    }

    fn check_in(&self, client: Client) {
        if client.is_connected() {
            self.idle.lock().push((Instant::now(), client));
        } else {
            debug!("{} pool: connection lost, invalidating pool", self.name);
            self.clear();
        }
    }

    /// Drop every idle connection.
    pub fn clear(&self) {
        self.idle.lock().clear();
    }
}

/// A leased connection; returns to its pool on drop.
pub struct PooledClient {
    client: Option<Client>,
    pool: Arc<Pool>,
}

impl PooledClient {
    fn new(client: Client, pool: Arc<Pool>) -> Self {
        Self {
            client: Some(client),
            pool,
        }
    }

    /// Drop the connection without returning it (its state is unknown).
    pub fn discard(mut self) {
        self.client = None;
    }
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        // Only `discard` and `drop` empty the slot, and both consume the lease
        self.client.as_ref().expect("lease holds a client")
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().expect("lease holds a client")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.check_in(client);
        }
    }
}
