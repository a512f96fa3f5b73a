use std::net::SocketAddr;

/// The datagram output seam.  The transport owns the socket; `send`
/// is fire-and-forget, and inbound datagrams are handed to
/// [`Resolver::handle_datagram`](crate::Resolver::handle_datagram) by
/// whoever drives the socket's read side.
pub trait Transport {
    /// # Errors
    ///
    /// If the datagram was refused outright.  Delivery is never
    /// guaranteed either way; the wait-for-response timer covers
    /// silent loss.
    fn send(&mut self, peer: SocketAddr, payload: &[u8]) -> std::io::Result<()>;
}
