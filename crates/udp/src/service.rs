use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use rusttune_core::{Event, ProtocolError};

use crate::config::UdpConfig;

// Matches the largest request the panel ever sends with room to spare.
const MAX_DATAGRAM: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Datagram link to the panel. One socket, bound once, serves both directions:
/// inbound request frames are fanned out to subscribers, outbound events go to
/// the event port of whichever peer spoke to us last.
#[derive(Clone)]
pub struct UdpService {
    socket: Arc<UdpSocket>,
    peer: Arc<RwLock<Option<IpAddr>>>,
    event_port: u16,
    frames_tx: broadcast::Sender<Vec<u8>>,
    term: Arc<AtomicBool>,
    listen_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl UdpService {
    pub async fn bind(config: UdpConfig) -> Result<Self, LinkError> {
        let socket =
            Arc::new(UdpSocket::bind((config.bind_host.as_str(), config.request_port)).await?);
        debug!(addr = %socket.local_addr()?, "request socket bound");

        let peer = Arc::new(RwLock::new(None));
        let (frames_tx, _) = broadcast::channel(64);
        let term = Arc::new(AtomicBool::new(false));

        let listen_handle = tokio::spawn(listen_loop(
            socket.clone(),
            peer.clone(),
            frames_tx.clone(),
            term.clone(),
            config.recv_timeout,
        ));

        Ok(Self {
            socket,
            peer,
            event_port: config.event_port,
            frames_tx,
            term,
            listen_handle: Arc::new(Mutex::new(Some(listen_handle))),
        })
    }

    /// Subscribe to inbound request frames.
    pub fn commands(&self) -> broadcast::Receiver<Vec<u8>> {
        self.frames_tx.subscribe()
    }

    /// Send an event to the last-seen peer. Silently does nothing until a peer
    /// has contacted us.
    pub async fn send_event(&self, event: &Event) -> Result<(), LinkError> {
        let Some(ip) = *self.peer.read().await else {
            return Ok(());
        };
        let payload = event.encode()?;
        self.socket.send_to(&payload, (ip, self.event_port)).await?;
        Ok(())
    }

    pub async fn peer(&self) -> Option<IpAddr> {
        *self.peer.read().await
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.socket.local_addr()?)
    }

    /// Request cooperative shutdown; the listener observes the flag within one
    /// receive timeout.
    pub fn shutdown(&self) {
        self.term.store(true, Ordering::Relaxed);
    }

    /// Wait for the listener to actually exit. Until it has, the request port
    /// is still held and a rebind to it fails.
    pub async fn closed(&self) {
        let handle = self.listen_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.term.load(Ordering::Relaxed)
    }
}

async fn listen_loop(
    socket: Arc<UdpSocket>,
    peer: Arc<RwLock<Option<IpAddr>>>,
    frames_tx: broadcast::Sender<Vec<u8>>,
    term: Arc<AtomicBool>,
    recv_timeout: Duration,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while !term.load(Ordering::Relaxed) {
        match timeout(recv_timeout, socket.recv_from(&mut buf)).await {
            // Timeout is the normal idle path, not an error; loop to re-check term.
            Err(_) => continue,
            Ok(Err(e)) => {
                warn!(error = %e, "request socket receive failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok(Ok((len, from))) => {
                *peer.write().await = Some(from.ip());
                let _ = frames_tx.send(buf[..len].to_vec());
            }
        }
    }
    debug!("request listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> UdpConfig {
        UdpConfig {
            bind_host: "127.0.0.1".to_string(),
            request_port: 0,
            event_port: 0, // rewritten per test
            recv_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn frames_are_broadcast_and_peer_recorded() {
        let service = UdpService::bind(loopback_config()).await.unwrap();
        let mut frames = service.commands();
        let addr = service.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(br#"["wakeup",[]]"#, addr).await.unwrap();

        let frame = timeout(Duration::from_secs(1), frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, br#"["wakeup",[]]"#.to_vec());
        assert_eq!(
            service.peer().await,
            Some("127.0.0.1".parse::<IpAddr>().unwrap())
        );
        service.shutdown();
    }

    #[tokio::test]
    async fn send_event_is_a_noop_without_a_peer() {
        let service = UdpService::bind(loopback_config()).await.unwrap();
        // No peer yet: must not error, must not send anywhere.
        service.send_event(&Event::Heartbeat).await.unwrap();
        assert_eq!(service.peer().await, None);
        service.shutdown();
    }

    #[tokio::test]
    async fn closed_releases_the_request_port() {
        let mut cfg = loopback_config();
        let service = UdpService::bind(cfg.clone()).await.unwrap();
        let port = service.local_addr().unwrap().port();

        service.shutdown();
        service.closed().await;
        drop(service);

        // With the listener gone, the exact same port is bindable again.
        cfg.request_port = port;
        let rebound = UdpService::bind(cfg).await.unwrap();
        rebound.shutdown();
    }

    #[tokio::test]
    async fn events_go_to_the_peer_event_port() {
        let event_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let event_port = event_sock.local_addr().unwrap().port();

        let mut cfg = loopback_config();
        cfg.event_port = event_port;
        let service = UdpService::bind(cfg).await.unwrap();
        let addr = service.local_addr().unwrap();

        let mut frames = service.commands();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(br#"["wakeup",[]]"#, addr).await.unwrap();
        // The frame arriving means the listener has recorded the peer.
        timeout(Duration::from_secs(1), frames.recv())
            .await
            .unwrap()
            .unwrap();

        service.send_event(&Event::TxProgress(90)).await.unwrap();
        let mut buf = [0u8; 64];
        let (len, _) = timeout(Duration::from_secs(1), event_sock.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Event::decode(&buf[..len]).unwrap(), Event::TxProgress(90));
        service.shutdown();
    }
}
