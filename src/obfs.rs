//! On-wire obfuscation
//!
//! A keyed XOR transform over WireGuard message headers, designed so that
//! obfuscated and plain traffic can coexist on one socket and be told apart
//! at receive time without per-peer state.
//!
//! The last 16 bytes of an emitted packet act as the nonce. Fixed-size
//! handshake messages gain a random suffix of 16 to 399 bytes (its tail is
//! the nonce); transport packets shorter than 256 bytes gain a 16-byte
//! suffix and a marker in `packet[1]`; larger transport packets reuse their
//! own trailing bytes, so the MTU never grows on the bulk path.
//!
//! The XOR stream is a sequence of 8-byte words from an incremental XXHash64
//! digest: the nonce is fed once, then one copy of the key hash per word,
//! taking the digest after each feed. Only the header region is XORed: the
//! fixed message size for handshake types, the first 16 bytes for transport.
//! The first word is post-processed so the obfuscated output can never match
//! the plain WireGuard header shape (type byte 1..=4 followed by three zero
//! bytes); receivers use that shape to skip deobfuscation for plain packets.

use std::hash::Hasher;

use rand::RngCore;
use sha2::{Digest, Sha256};
use twox_hash::XxHash64;

use crate::packet::{Packet, FLAG_DEOBFUSCATED_AFTER_RECEIVED, FLAG_OBFUSCATE_BEFORE_SEND};
use crate::wire::{
    MessageType, INITIATION_MAC2_RANGE, MESSAGE_COOKIE_REPLY_SIZE, MESSAGE_INITIATION_SIZE,
    MESSAGE_RESPONSE_SIZE, MIN_MESSAGE_SIZE, RESPONSE_MAC2_RANGE,
};

/// Nonce length carried at the packet tail
const NONCE_LEN: usize = 16;

/// Transport packets below this length are expanded by one nonce
const TRANSPORT_EXPAND_THRESHOLD: usize = 256;

/// Maximum extra random suffix on fixed-size handshake messages, beyond the
/// nonce itself
const MAX_EXTRA_SUFFIX: usize = 384;

/// Header region of a transport message (type, reserved, receiver, counter)
const TRANSPORT_HEADER_LEN: usize = 16;

/// Keyed obfuscator over WireGuard headers.
///
/// Disabled when constructed with an empty user key; a disabled obfuscator
/// passes packets through untouched in both directions.
#[derive(Debug, Clone)]
pub struct Obfuscator {
    key_hash: Option<[u8; 32]>,
}

impl Obfuscator {
    /// Create an obfuscator from a user key. An empty key disables it.
    #[must_use]
    pub fn new(user_key: &str) -> Self {
        if user_key.is_empty() {
            return Self::disabled();
        }
        let key_hash: [u8; 32] = Sha256::digest(user_key.as_bytes()).into();
        Self {
            key_hash: Some(key_hash),
        }
    }

    /// An obfuscator that never transforms anything
    #[must_use]
    pub fn disabled() -> Self {
        Self { key_hash: None }
    }

    /// Whether a user key was configured
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.key_hash.is_some()
    }

    /// Obfuscate a packet in place when it carries the egress flag.
    ///
    /// Message length may grow by the appended nonce or random suffix; the
    /// packet buffer capacity bounds the growth.
    pub fn obfuscate(&self, packet: &mut Packet) {
        let Some(key_hash) = self.key_hash else {
            return;
        };
        if !packet.has_flag(FLAG_OBFUSCATE_BEFORE_SEND) {
            return;
        }
        let Some(message_type) = packet.message_type() else {
            return;
        };
        let len = packet.len();
        let mut region = match message_type {
            MessageType::Initiation => MESSAGE_INITIATION_SIZE,
            MessageType::Response => MESSAGE_RESPONSE_SIZE,
            MessageType::CookieReply => MESSAGE_COOKIE_REPLY_SIZE,
            MessageType::Transport => TRANSPORT_HEADER_LEN,
        };
        if len < region || len < MIN_MESSAGE_SIZE {
            return;
        }

        // A zero mac2 is the common case (no cookie pressure). Filling it
        // with random bytes removes the only long zero run in the header;
        // packet[1] records that the receiver must re-zero it.
        match message_type {
            MessageType::Initiation => {
                if randomize_zero_mac2(packet, INITIATION_MAC2_RANGE) {
                    region = INITIATION_MAC2_RANGE.start;
                }
            }
            MessageType::Response => {
                if randomize_zero_mac2(packet, RESPONSE_MAC2_RANGE) {
                    region = RESPONSE_MAC2_RANGE.start;
                }
            }
            _ => {}
        }

        let mut nonce = [0u8; NONCE_LEN];
        match message_type {
            MessageType::Transport if len >= TRANSPORT_EXPAND_THRESHOLD => {
                // The packet tail doubles as the nonce; nothing is appended
                // and packet[1] is left as-is.
                nonce.copy_from_slice(&packet.slice()[len - NONCE_LEN..]);
            }
            MessageType::Transport => {
                if packet.capacity() < len + NONCE_LEN {
                    return;
                }
                rand::thread_rng().fill_bytes(&mut nonce);
                packet.slice_mut()[1] = 0x01;
                packet.buf_mut()[len..len + NONCE_LEN].copy_from_slice(&nonce);
                packet.set_len(len + NONCE_LEN);
            }
            _ => {
                // Fixed-size handshake messages take a variable random
                // suffix whose tail is the nonce, hiding their length.
                let extra = rand::thread_rng().next_u32() as usize % MAX_EXTRA_SUFFIX;
                let suffix_len = (NONCE_LEN + extra).min(packet.capacity() - len);
                if suffix_len < NONCE_LEN {
                    return;
                }
                let end = len + suffix_len;
                rand::thread_rng().fill_bytes(&mut packet.buf_mut()[len..end]);
                nonce.copy_from_slice(&packet.buf_mut()[end - NONCE_LEN..end]);
                packet.set_len(end);
            }
        }

        let mut stream = XorStream::new(&nonce, &key_hash);
        stream.apply(&mut packet.slice_mut()[..region]);
    }

    /// Reverse the transform when the packet does not already look like a
    /// plain WireGuard message. Sets the receive flag after deobfuscation.
    pub fn deobfuscate(&self, packet: &mut Packet) {
        let Some(key_hash) = self.key_hash else {
            return;
        };
        let len = packet.len();
        if len < MIN_MESSAGE_SIZE {
            return;
        }
        if is_plain_wireguard(packet.slice()) {
            return;
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&packet.slice()[len - NONCE_LEN..]);

        let mut stream = XorStream::new(&nonce, &key_hash);
        stream.apply(&mut packet.slice_mut()[..8]);

        let Some(message_type) = MessageType::from_byte(packet.slice()[0]) else {
            // Wrong key or stray datagram. Put the bytes back and let the
            // dispatcher drop it as unparseable.
            let mut undo = XorStream::new(&nonce, &key_hash);
            undo.apply(&mut packet.slice_mut()[..8]);
            return;
        };

        let marker = packet.slice()[1] == 0x01;
        let (region, new_len) = match message_type {
            MessageType::Initiation if marker => {
                (INITIATION_MAC2_RANGE.start, MESSAGE_INITIATION_SIZE)
            }
            MessageType::Initiation => (MESSAGE_INITIATION_SIZE, MESSAGE_INITIATION_SIZE),
            MessageType::Response if marker => (RESPONSE_MAC2_RANGE.start, MESSAGE_RESPONSE_SIZE),
            MessageType::Response => (MESSAGE_RESPONSE_SIZE, MESSAGE_RESPONSE_SIZE),
            MessageType::CookieReply => (MESSAGE_COOKIE_REPLY_SIZE, MESSAGE_COOKIE_REPLY_SIZE),
            MessageType::Transport if marker => (TRANSPORT_HEADER_LEN, len - NONCE_LEN),
            MessageType::Transport => (TRANSPORT_HEADER_LEN, len),
        };
        if len < region || new_len > len {
            let mut undo = XorStream::new(&nonce, &key_hash);
            undo.apply(&mut packet.slice_mut()[..8]);
            return;
        }

        stream.apply(&mut packet.slice_mut()[8..region]);

        match message_type {
            MessageType::Initiation if marker => {
                packet.slice_mut()[INITIATION_MAC2_RANGE].fill(0);
                packet.slice_mut()[1] = 0;
            }
            MessageType::Response if marker => {
                packet.slice_mut()[RESPONSE_MAC2_RANGE].fill(0);
                packet.slice_mut()[1] = 0;
            }
            MessageType::Transport if marker => {
                packet.slice_mut()[1] = 0;
            }
            _ => {}
        }

        packet.set_len(new_len);
        packet.set_flag(FLAG_DEOBFUSCATED_AFTER_RECEIVED);
    }
}

/// When the mac2 field is all zero (no cookie pressure), fill it with
/// random bytes and mark `packet[1]`. Returns whether the fill happened.
fn randomize_zero_mac2(packet: &mut Packet, range: std::ops::Range<usize>) -> bool {
    let data = packet.slice_mut();
    if !data[range.clone()].iter().all(|&b| b == 0) {
        return false;
    }
    rand::thread_rng().fill_bytes(&mut data[range]);
    data[1] = 0x01;
    true
}

/// The plain WireGuard header shape: a known type byte and three zero
/// reserved bytes. Obfuscated output never matches it.
#[must_use]
pub fn is_plain_wireguard(data: &[u8]) -> bool {
    data.len() >= 4
        && (1..=4).contains(&data[0])
        && data[1] == 0
        && data[2] == 0
        && data[3] == 0
}

/// Incremental XXHash64 word stream.
///
/// Word `i` is the big-endian digest after feeding the nonce and `i + 1`
/// copies of the key hash. The first word is masked so the first four output
/// bytes cannot collide with the plain header shape.
struct XorStream<'a> {
    hasher: XxHash64,
    key_hash: &'a [u8; 32],
    first: bool,
}

impl<'a> XorStream<'a> {
    fn new(nonce: &[u8; NONCE_LEN], key_hash: &'a [u8; 32]) -> Self {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(nonce);
        Self {
            hasher,
            key_hash,
            first: true,
        }
    }

    fn next_word(&mut self) -> [u8; 8] {
        self.hasher.write(self.key_hash);
        let mut word = self.hasher.finish().to_be_bytes();
        if self.first {
            self.first = false;
            // The masked bits guarantee the first byte leaves the 1..=4
            // range or the second byte becomes non-zero after XOR.
            if word[0] & 0b1111_1000 == 0 && word[1] & 0b1111_1110 == 0 {
                word[0] |= 0b1101_0111;
                word[1] |= 0b0110_1001;
            }
        }
        word
    }

    /// XOR consecutive words over `data`, continuing from the current state
    fn apply(&mut self, data: &mut [u8]) {
        for chunk in data.chunks_mut(8) {
            let word = self.next_word();
            for (byte, key) in chunk.iter_mut().zip(word.iter()) {
                *byte ^= key;
            }
        }
    }
}
