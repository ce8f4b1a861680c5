use crate::node_metrics::{ADVERTS_ACCEPTED_TOTAL, ADVERTS_DISCARDED_TOTAL};
use crate::service_configuration::DiscoveryConfig;
use anyhow::{Context, Result};
use gantry_core::advert::ProxyAdvertisement;
use gantry_core::handler::ManagementHandler;
use metrics::counter;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Discovers front-end proxies via unauthenticated multicast.
///
/// Lifecycle: Stopped -> Listening -> Stopped. The listener owns exactly
/// one background task bound to one datagram socket; `close()` is the sole
/// cancellation primitive and unblocks a pending receive. There is no
/// cooperative flag consulted between receives, so a stop request cannot
/// race a blocking receive: the task selects on the shutdown signal and
/// the receive in one suspension point.
///
/// Every datagram is decoded, digest-verified against the shared secret
/// and checked for freshness against the last accepted (date, sequence)
/// marker from the same sender. Rejects are silent at the wire: a
/// verification failure must look no different from "no proxy present" to
/// an observer on the segment.
pub(crate) struct AdvertListener {
    secret_key: String,
    handler: Arc<dyn ManagementHandler>,
    socket: Mutex<Option<UdpSocket>>,
    local_addr: SocketAddr,
    listening: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    closed: AtomicBool,
}

impl AdvertListener {
    /// Bind a listener to the configured multicast group.
    pub(crate) fn bind(
        config: &DiscoveryConfig,
        handler: Arc<dyn ManagementHandler>,
    ) -> Result<Self> {
        let socket = bind_multicast(config.group, config.port, config.ttl).with_context(|| {
            format!(
                "failed to join multicast group {}:{}",
                config.group, config.port
            )
        })?;
        Self::from_socket(socket, config.secret_key.clone(), handler)
    }

    /// Build a listener around an already-bound datagram socket. The
    /// channel-construction seam: production goes through `bind`, tests
    /// inject a loopback socket.
    pub(crate) fn from_socket(
        socket: UdpSocket,
        secret_key: String,
        handler: Arc<dyn ManagementHandler>,
    ) -> Result<Self> {
        let local_addr = socket.local_addr().context("listener socket address")?;
        Ok(AdvertListener {
            secret_key,
            handler,
            socket: Mutex::new(Some(socket)),
            local_addr,
            listening: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        })
    }

    #[allow(dead_code)]
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the receive loop. A listener closed before start stays
    /// Stopped; a second start is a no-op (the socket is gone).
    pub(crate) fn start(&self) {
        let socket = match self.socket.lock().expect("listener socket lock").take() {
            Some(socket) => socket,
            None => return,
        };
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        self.listening.store(true, Ordering::SeqCst);
        let secret_key = self.secret_key.clone();
        let handler = Arc::clone(&self.handler);
        let listening = Arc::clone(&self.listening);
        let shutdown = Arc::clone(&self.shutdown);

        info!(addr = %self.local_addr, "proxy advertisement listener started");
        tokio::spawn(async move {
            receive_loop(socket, secret_key, handler, shutdown).await;
            listening.store(false, Ordering::SeqCst);
            debug!("proxy advertisement listener stopped");
        });
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Stop the listener, waking a blocked receive. Idempotent and
    /// callable from any state; a second call is a no-op and raises
    /// nothing.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // notify_one stores a permit, so the signal is not lost even if
        // the receive task has not reached its select yet.
        self.shutdown.notify_one();
    }
}

async fn receive_loop(
    socket: UdpSocket,
    secret_key: String,
    handler: Arc<dyn ManagementHandler>,
    shutdown: Arc<Notify>,
) {
    // Last accepted (date, sequence) marker per sender address.
    let mut last_seen: HashMap<IpAddr, (u64, u64)> = HashMap::new();
    let mut buf = vec![0u8; 1500];

    loop {
        let (len, from) = tokio::select! {
            _ = shutdown.notified() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "transient receive error on advertisement channel");
                    continue;
                }
                Err(e) => {
                    // Fatal channel failure: the loop terminates and the
                    // state is observable only via is_listening().
                    error!(error = %e, "advertisement channel closed");
                    break;
                }
            },
        };

        let advert = match ProxyAdvertisement::decode(&buf[..len]) {
            Ok(advert) => advert,
            Err(e) => {
                debug!(%from, error = %e, "discarding malformed advertisement");
                counter!(ADVERTS_DISCARDED_TOTAL.name).increment(1);
                continue;
            }
        };

        if !advert.verify(&secret_key) {
            debug!(%from, server = %advert.server, "discarding advertisement with bad digest");
            counter!(ADVERTS_DISCARDED_TOTAL.name).increment(1);
            continue;
        }

        if !advert.is_fresher_than(last_seen.get(&from.ip()).copied()) {
            debug!(%from, server = %advert.server, "discarding stale advertisement");
            counter!(ADVERTS_DISCARDED_TOTAL.name).increment(1);
            continue;
        }

        last_seen.insert(from.ip(), advert.freshness());
        counter!(ADVERTS_ACCEPTED_TOTAL.name).increment(1);
        handler.proxy_discovered(advert, from).await;
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionReset
    )
}

/// Open the multicast datagram channel: reuse-addr so several nodes on one
/// host can share the group, bound to the wildcard address on the
/// advertisement port.
fn bind_multicast(group: Ipv4Addr, port: u16, ttl: u32) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}
