//! Seam to the management-protocol (MCMP) transport.
//!
//! The transport that actually registers proxies and pushes
//! CONFIG/ENABLE/STATUS commands over HTTP lives outside this crate. The
//! core only feeds it: discovery events from the advertisement listener
//! and the periodic load balance factor.

use crate::advert::ProxyAdvertisement;
use async_trait::async_trait;
use std::net::SocketAddr;

#[async_trait]
pub trait ManagementHandler: Send + Sync {
    /// One accepted advertisement datagram. Dispatched synchronously from
    /// the listener task, so implementations must not block for long or
    /// they stall further discovery. Whether the proxy gets registered,
    /// refreshed or ignored is the handler's decision; the listener keeps
    /// no proxy registry.
    async fn proxy_discovered(&self, advert: ProxyAdvertisement, from: SocketAddr);

    /// Periodic export of the load balance factor, in [-1, 100].
    /// -1 means the node is unavailable for routing.
    async fn report_load(&self, factor: i32);
}
