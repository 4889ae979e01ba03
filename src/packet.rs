//! Pooled packet buffers
//!
//! A [`Packet`] is a fixed-capacity byte buffer with a current length, source
//! and destination addresses, and a small flag set used to communicate with
//! the obfuscation layer. Packets are drawn from a lock-free [`PacketPool`]
//! and returned automatically when the [`PooledPacket`] guard is dropped.
//!
//! Buffers are zero-initialized once at allocation. `reset()` clears the
//! metadata but does not scrub the bytes; the next receive overwrites them.

use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Default packet buffer capacity, the maximum possible size of a UDP payload.
///
/// 1500 is sufficient for most deployments because WireGuard only emits large
/// UDP datagrams when the tunnel interface is configured with a jumbo MTU. On
/// memory-constrained hosts the capacity can be lowered to that.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 65536;

/// Number of packets the pool retains for reuse
const POOL_CAPACITY: usize = 1024;

/// Set after the receive path reversed on-wire obfuscation
pub const FLAG_DEOBFUSCATED_AFTER_RECEIVED: u64 = 1 << 0;

/// Set to request obfuscation on the egress path
pub const FLAG_OBFUSCATE_BEFORE_SEND: u64 = 1 << 1;

/// A UDP packet in flight through the relay
#[derive(Debug)]
pub struct Packet {
    data: Vec<u8>,
    length: usize,
    source: Option<SocketAddr>,
    destination: Option<SocketAddr>,
    flags: u64,
}

impl Packet {
    /// Create a packet with the given buffer capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            length: 0,
            source: None,
            destination: None,
            flags: 0,
        }
    }

    /// Clear length, addresses, and flags. Buffer bytes are left as-is.
    pub fn reset(&mut self) {
        self.length = 0;
        self.source = None;
        self.destination = None;
        self.flags = 0;
    }

    /// The filled portion of the buffer
    #[must_use]
    pub fn slice(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Mutable view of the filled portion
    pub fn slice_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.length]
    }

    /// The whole buffer, independent of the current length
    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Full buffer capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current packet length
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the packet holds no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Set the packet length after a receive or a size-changing transform.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the buffer capacity.
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.data.len(), "length exceeds packet capacity");
        self.length = len;
    }

    /// Source address the packet was received from
    #[must_use]
    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    /// Record the source address
    pub fn set_source(&mut self, addr: SocketAddr) {
        self.source = Some(addr);
    }

    /// Destination the packet will be sent to
    #[must_use]
    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }

    /// Record the destination address
    pub fn set_destination(&mut self, addr: SocketAddr) {
        self.destination = Some(addr);
    }

    /// Current flag bits
    #[must_use]
    pub fn flags(&self) -> u64 {
        self.flags
    }

    /// Check a flag bit
    #[must_use]
    pub fn has_flag(&self, flag: u64) -> bool {
        self.flags & flag != 0
    }

    /// Set a flag bit
    pub fn set_flag(&mut self, flag: u64) {
        self.flags |= flag;
    }
}

/// A lock-free pool of packet buffers.
///
/// The pool is bounded; when full, returned packets are simply dropped. Each
/// buffer's capacity is fixed at pool creation.
#[derive(Debug)]
pub struct PacketPool {
    packets: ArrayQueue<Packet>,
    packet_size: usize,
}

impl PacketPool {
    /// Create a pool whose packets have `packet_size` capacity
    #[must_use]
    pub fn new(packet_size: usize) -> Self {
        Self {
            packets: ArrayQueue::new(POOL_CAPACITY),
            packet_size,
        }
    }

    /// Get a packet from the pool or allocate a fresh one
    #[must_use]
    pub fn get(self: &Arc<Self>) -> PooledPacket {
        let packet = self
            .packets
            .pop()
            .unwrap_or_else(|| Packet::with_capacity(self.packet_size));
        PooledPacket {
            packet: Some(packet),
            pool: Arc::clone(self),
        }
    }

    /// Buffer capacity of pooled packets
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Number of packets currently idle in the pool
    #[must_use]
    pub fn available(&self) -> usize {
        self.packets.len()
    }

    fn recycle(&self, mut packet: Packet) {
        packet.reset();
        // Queue full means the packet is dropped, which is fine.
        let _ = self.packets.push(packet);
    }
}

/// A packet borrowed from the pool.
///
/// Returns to the pool when dropped, so every handler exit path recycles its
/// buffer without explicit bookkeeping.
#[derive(Debug)]
pub struct PooledPacket {
    packet: Option<Packet>,
    pool: Arc<PacketPool>,
}

impl Drop for PooledPacket {
    fn drop(&mut self) {
        if let Some(packet) = self.packet.take() {
            self.pool.recycle(packet);
        }
    }
}

impl Deref for PooledPacket {
    type Target = Packet;

    fn deref(&self) -> &Self::Target {
        self.packet.as_ref().expect("packet taken")
    }
}

impl DerefMut for PooledPacket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.packet.as_mut().expect("packet taken")
    }
}
