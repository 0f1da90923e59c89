//! UDP overlay transport.
//!
//! One envelope per datagram, JSON-framed. The listener task decodes
//! inbound datagrams, tracks the sender in the peer table and funnels
//! envelopes to the core executor over a channel; outbound sends go
//! through [`NetworkOut`].

use bytes::Bytes;
use dashmap::DashMap;
use diva_chain::Envelope;
use diva_crypto::PublicKey;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Maximum UDP payload this transport will send.
pub const MAX_DATAGRAM: usize = 65_000;

/// Last-seen bookkeeping for a peer.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub address: SocketAddr,
    pub last_seen_ms: u64,
}

/// Peers observed on the wire, keyed by base64url public key.
pub type PeerTable = DashMap<String, PeerInfo>;

/// Outbound datagram sender.
#[derive(Clone)]
pub struct NetworkOut {
    socket: Arc<UdpSocket>,
}

impl NetworkOut {
    /// Sends one encoded envelope to an address.
    pub async fn send(&self, addr: SocketAddr, bytes: &Bytes) {
        if bytes.len() > MAX_DATAGRAM {
            tracing::warn!(len = bytes.len(), "datagram too large, dropped");
            return;
        }
        if let Err(e) = self.socket.send_to(bytes, addr).await {
            tracing::debug!(%addr, error = %e, "send failed");
        }
    }
}

/// Binds the overlay socket and spawns the listener task.
///
/// Returns the outbound handle, the inbound envelope stream and the
/// peer table.
pub async fn start(
    bind: SocketAddr,
    inbound_capacity: usize,
) -> std::io::Result<(NetworkOut, mpsc::Receiver<Envelope>, Arc<PeerTable>)> {
    let socket = Arc::new(UdpSocket::bind(bind).await?);
    let (tx, rx) = mpsc::channel(inbound_capacity);
    let peers: Arc<PeerTable> = Arc::new(DashMap::new());

    tracing::info!(addr = %bind, "overlay listening");

    let listener_socket = socket.clone();
    let listener_peers = peers.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = match listener_socket.recv_from(&mut buf).await {
                Ok(ok) => ok,
                Err(e) => {
                    tracing::warn!(error = %e, "receive failed");
                    continue;
                }
            };

            let envelope = match Envelope::decode(&buf[..len]) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::debug!(%from, error = %e, "undecodable datagram dropped");
                    continue;
                }
            };

            touch(&listener_peers, &envelope.origin, from);

            if tx.send(envelope).await.is_err() {
                // Core executor is gone; shutdown in progress.
                return;
            }
        }
    });

    Ok((NetworkOut { socket }, rx, peers))
}

fn touch(peers: &PeerTable, origin: &PublicKey, addr: SocketAddr) {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64);

    peers.insert(
        origin.to_b64(),
        PeerInfo {
            address: addr,
            last_seen_ms: now_ms,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use diva_chain::Payload;
    use diva_crypto::Keypair;

    #[tokio::test]
    async fn datagram_roundtrip() {
        let (out, mut rx, peers) = start("127.0.0.1:0".parse().unwrap(), 16).await.unwrap();
        let addr = out.socket.local_addr().unwrap();

        let key = Keypair::from_secret_bytes(&[1u8; 32]).unwrap();
        let envelope = Envelope::build(
            &key,
            "t-1".into(),
            1,
            String::new(),
            Payload::Sync {
                from_height: 1,
                to_height: 2,
            },
        )
        .unwrap();

        out.send(addr, &envelope.encode().unwrap()).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received, envelope);
        assert!(peers.contains_key(&key.public_key().to_b64()));
    }
}
