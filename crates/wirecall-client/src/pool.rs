use tokio::sync::Mutex;

use wirecall_common::transport::{Connection, Status};

/// Bounded pool of reusable client connections.
///
/// Connections that finished a call cleanly (`Done`, no error observed) are
/// checked back in while the pool is under capacity and handed out LIFO to
/// later calls, skipping the reconnect/handshake cost. Entries are pruned
/// lazily: checkout probes each candidate and discards dead ones until an
/// alive connection (or nothing) remains.
///
/// The pool is only ever mutated behind its async mutex, so it is safe to
/// share across tasks.
pub struct ConnectionPool {
    connections: Mutex<Vec<Connection>>,
    capacity: usize,
}

impl ConnectionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pops the most recently returned connection that is still alive.
    ///
    /// Dead entries encountered on the way are dropped; they are never
    /// handed out.
    pub async fn checkout(&self) -> Option<Connection> {
        let mut connections = self.connections.lock().await;

        while let Some(mut conn) = connections.pop() {
            if conn.is_alive().await {
                conn.set_status(Status::Established);
                return Some(conn);
            }
            tracing::debug!(peer = %conn.peer(), "discarding dead pooled connection");
        }

        None
    }

    /// Returns a connection to the pool for reuse.
    ///
    /// Only connections that reached `Done` cleanly qualify; anything else
    /// (or an over-capacity pool, or leftover undecoded bytes) is dropped
    /// and the socket closed.
    pub async fn checkin(&self, conn: Connection) {
        if conn.status() != Status::Done || conn.has_buffered_data() {
            return;
        }

        let mut connections = self.connections.lock().await;
        if connections.len() < self.capacity {
            connections.push(conn);
        }
    }

    pub async fn size(&self) -> usize {
        self.connections.lock().await.len()
    }
}
