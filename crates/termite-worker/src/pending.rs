//! Rendezvous registry pairing inbound labelled connections with the
//! requests that expect them. Either side may arrive first: a
//! connection parks until someone waits for its id, and a waiter parks
//! until the connection shows up.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use termite_proto::NetConn;

enum Slot {
    Ready(NetConn),
    Waiting(oneshot::Sender<NetConn>),
}

#[derive(Default)]
pub struct PendingConnections {
    slots: Mutex<HashMap<String, Slot>>,
}

impl PendingConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an accepted connection under its announced id. An empty id
    /// is not consumed: the connection comes straight back for general
    /// RPC service.
    pub fn accept(&self, id: &str, conn: NetConn) -> Option<NetConn> {
        if id.is_empty() {
            return Some(conn);
        }
        let mut slots = self.slots.lock().unwrap();
        match slots.remove(id) {
            Some(Slot::Waiting(tx)) => {
                debug!(id, "connection matched waiter");
                if let Err(conn) = tx.send(conn) {
                    // The waiter gave up; park the connection for the next one.
                    slots.insert(id.to_string(), Slot::Ready(conn));
                }
            }
            Some(Slot::Ready(previous)) => {
                // A second connection with the same id replaces the first.
                debug!(id, peer = %previous.peer, "replacing parked connection");
                slots.insert(id.to_string(), Slot::Ready(conn));
            }
            None => {
                slots.insert(id.to_string(), Slot::Ready(conn));
            }
        }
        None
    }

    /// Block until a connection announcing `id` arrives.
    pub async fn wait_connection(&self, id: &str) -> NetConn {
        let rx = {
            let mut slots = self.slots.lock().unwrap();
            match slots.remove(id) {
                Some(Slot::Ready(conn)) => return conn,
                Some(Slot::Waiting(_)) | None => {
                    let (tx, rx) = oneshot::channel();
                    slots.insert(id.to_string(), Slot::Waiting(tx));
                    rx
                }
            }
        };
        // The sender is only dropped if a later waiter replaces this
        // one; pending() then parks forever, which mirrors "no such
        // connection ever arrives".
        match rx.await {
            Ok(conn) => conn,
            Err(_) => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn conn(peer: &str) -> NetConn {
        let (a, _b) = tokio::io::duplex(64);
        // Keep the far end alive long enough for the test.
        std::mem::forget(_b);
        NetConn::new(a, peer)
    }

    #[tokio::test]
    async fn connection_first_then_waiter() {
        let pending = PendingConnections::new();
        assert!(pending.accept("fwd-1", conn("10.0.0.1:9")).is_none());
        let got = pending.wait_connection("fwd-1").await;
        assert_eq!(got.peer, "10.0.0.1:9");
    }

    #[tokio::test]
    async fn waiter_first_then_connection() {
        let pending = std::sync::Arc::new(PendingConnections::new());
        let waiter = {
            let pending = pending.clone();
            tokio::spawn(async move { pending.wait_connection("rev-1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pending.accept("rev-1", conn("10.0.0.2:9")).is_none());
        assert_eq!(waiter.await.unwrap().peer, "10.0.0.2:9");
    }

    #[tokio::test]
    async fn empty_id_is_not_consumed() {
        let pending = PendingConnections::new();
        let back = pending.accept("", conn("10.0.0.3:9"));
        assert_eq!(back.expect("returned for rpc service").peer, "10.0.0.3:9");
    }

    #[tokio::test]
    async fn distinct_ids_do_not_cross() {
        let pending = PendingConnections::new();
        pending.accept("a", conn("peer-a"));
        pending.accept("b", conn("peer-b"));
        assert_eq!(pending.wait_connection("b").await.peer, "peer-b");
        assert_eq!(pending.wait_connection("a").await.peer, "peer-a");
    }
}
