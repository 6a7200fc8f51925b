//! Download tickets for the out-of-band data channel.
//!
//! DOWNLOAD registers a ticket; CLAIM on a second connection from the same
//! host takes it out of the table exactly once.

use crate::error::{Result, VfsError};
use crate::ttl::ExpiringMap;
use crate::vfs::FileShare;
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: Uuid,
    pub owner: SocketAddr,
}

impl Ticket {
    /// Claims come from a new TCP connection, so only the host has to match.
    pub fn owned_by(&self, peer: SocketAddr) -> bool {
        self.owner.ip() == peer.ip()
    }
}

#[derive(Debug, Clone)]
pub struct DownloadTicket {
    pub ticket: Ticket,
    pub path: String,
    pub share: FileShare,
    pub offset: u64,
    pub length: u64,
}

pub struct TicketTable {
    tickets: ExpiringMap<Uuid, DownloadTicket>,
}

impl TicketTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tickets: ExpiringMap::new(ttl),
        }
    }

    pub fn register(
        &self,
        owner: SocketAddr,
        path: &str,
        share: FileShare,
        offset: u64,
        length: u64,
    ) -> DownloadTicket {
        let ticket = DownloadTicket {
            ticket: Ticket {
                id: Uuid::new_v4(),
                owner,
            },
            path: path.to_string(),
            share,
            offset,
            length,
        };
        self.tickets.insert(ticket.ticket.id, ticket.clone());
        ticket
    }

    /// Take a ticket out of the table.
    ///
    /// Unknown, expired and already claimed ids are `InvalidValue`; a claim
    /// from another host is `Unauthorized` and leaves the ticket in place.
    pub fn claim(&self, id: &str, claimer: SocketAddr) -> Result<DownloadTicket> {
        let key = Uuid::parse_str(id).map_err(|_| VfsError::invalid_value("ticket", id))?;
        let taken = self.tickets.take_if(&key, |t| {
            if t.ticket.owned_by(claimer) {
                Ok(())
            } else {
                Err(VfsError::Unauthorized(format!("ticket {} belongs to another host", id)))
            }
        });
        match taken {
            Some(result) => result,
            None => Err(VfsError::invalid_value("ticket", id)),
        }
    }

    pub fn sweep(&self) -> usize {
        self.tickets.sweep()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_claim_once() {
        let table = TicketTable::new(Duration::from_secs(60));
        let t = table.register(addr("10.0.0.1:5000"), "/a.txt", FileShare::Read, 0, 5);
        let id = t.ticket.id.to_string();
        let claimed = table.claim(&id, addr("10.0.0.1:5001")).unwrap();
        assert_eq!(claimed.path, "/a.txt");
        assert!(matches!(table.claim(&id, addr("10.0.0.1:5001")), Err(VfsError::InvalidValue { .. })));
        assert!(matches!(table.claim("not-a-uuid", addr("10.0.0.1:1")), Err(VfsError::InvalidValue { .. })));
    }

    #[test]
    fn test_foreign_host_cannot_claim() {
        let table = TicketTable::new(Duration::from_secs(60));
        let t = table.register(addr("10.0.0.1:5000"), "/a.txt", FileShare::None, 0, 5);
        let id = t.ticket.id.to_string();
        assert!(matches!(table.claim(&id, addr("10.0.0.2:5000")), Err(VfsError::Unauthorized(_))));
        assert_eq!(table.len(), 1);
        assert!(table.claim(&id, addr("10.0.0.1:6000")).is_ok());
    }

    #[test]
    fn test_expired_ticket_is_invalid() {
        let table = TicketTable::new(Duration::from_millis(20));
        let t = table.register(addr("10.0.0.1:5000"), "/a.txt", FileShare::None, 0, 5);
        std::thread::sleep(Duration::from_millis(40));
        assert!(matches!(
            table.claim(&t.ticket.id.to_string(), addr("10.0.0.1:5000")),
            Err(VfsError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_concurrent_claims_succeed_once() {
        let table = Arc::new(TicketTable::new(Duration::from_secs(60)));
        let t = table.register(addr("127.0.0.1:1"), "/a.txt", FileShare::None, 0, 5);
        let id = t.ticket.id.to_string();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = table.clone();
                let id = id.clone();
                std::thread::spawn(move || table.claim(&id, addr(&format!("127.0.0.1:{}", 2000 + i))).is_ok())
            })
            .collect();
        let wins = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(wins, 1);
        assert!(table.is_empty());
    }
}
