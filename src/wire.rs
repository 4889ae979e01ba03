//! WireGuard wire format
//!
//! Message layouts, fixed sizes, and the little-endian index codec. The relay
//! only ever reads and rewrites the `sender`/`receiver` index fields; payloads
//! pass through untouched. After any header edit on an initiation or response
//! the MACs must be recomputed with [`fix_macs`].

use crate::error::PacketError;
use crate::noise::cookie::CookieGenerator;
use crate::packet::Packet;

/// The four WireGuard message types, from the type byte at offset 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Handshake initiation (fixed 148 bytes)
    Initiation = 1,
    /// Handshake response (fixed 92 bytes)
    Response = 2,
    /// Cookie reply under load (fixed 64 bytes)
    CookieReply = 3,
    /// Transport data (variable, at least 32 bytes)
    Transport = 4,
}

impl MessageType {
    /// Map a wire type byte to a message type
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Initiation),
            2 => Some(Self::Response),
            3 => Some(Self::CookieReply),
            4 => Some(Self::Transport),
            _ => None,
        }
    }

    /// The wire type byte
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Fixed size of a handshake initiation
pub const MESSAGE_INITIATION_SIZE: usize = 148;
/// Fixed size of a handshake response
pub const MESSAGE_RESPONSE_SIZE: usize = 92;
/// Fixed size of a cookie reply
pub const MESSAGE_COOKIE_REPLY_SIZE: usize = 64;
/// Minimum size of any WireGuard message (transport header + tag)
pub const MIN_MESSAGE_SIZE: usize = 32;

/// mac2 field range within an initiation
pub const INITIATION_MAC2_RANGE: std::ops::Range<usize> = 132..148;
/// mac2 field range within a response
pub const RESPONSE_MAC2_RANGE: std::ops::Range<usize> = 76..92;

impl Packet {
    /// The message type, if the packet is non-empty and the byte is known
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        if self.is_empty() {
            return None;
        }
        MessageType::from_byte(self.slice()[0])
    }

    /// Read the receiver index of this message.
    ///
    /// # Errors
    ///
    /// Fails when the packet is too short or the message type carries no
    /// receiver field (initiations do not).
    pub fn receiver_index(&self) -> Result<u32, PacketError> {
        match self.known_message_type("receiver_index")? {
            MessageType::Response => self.get_u32_le(8),
            MessageType::CookieReply | MessageType::Transport => self.get_u32_le(4),
            MessageType::Initiation => Err(PacketError::NoSuchField {
                message_type: MessageType::Initiation.as_byte(),
                field: "receiver_index",
            }),
        }
    }

    /// Read the sender index of this message.
    ///
    /// # Errors
    ///
    /// Fails when the packet is too short or the message type carries no
    /// sender field.
    pub fn sender_index(&self) -> Result<u32, PacketError> {
        match self.known_message_type("sender_index")? {
            MessageType::Initiation | MessageType::Response => self.get_u32_le(4),
            other => Err(PacketError::NoSuchField {
                message_type: other.as_byte(),
                field: "sender_index",
            }),
        }
    }

    /// Overwrite the sender index.
    ///
    /// # Errors
    ///
    /// Fails when the packet is too short or the message type carries no
    /// sender field.
    pub fn set_sender_index(&mut self, index: u32) -> Result<(), PacketError> {
        match self.known_message_type("sender_index")? {
            MessageType::Initiation | MessageType::Response => self.put_u32_le(4, index),
            other => Err(PacketError::NoSuchField {
                message_type: other.as_byte(),
                field: "sender_index",
            }),
        }
    }

    /// Overwrite the receiver index.
    ///
    /// # Errors
    ///
    /// Fails when the packet is too short or the message type carries no
    /// receiver field.
    pub fn set_receiver_index(&mut self, index: u32) -> Result<(), PacketError> {
        match self.known_message_type("receiver_index")? {
            MessageType::Response => self.put_u32_le(8, index),
            MessageType::CookieReply | MessageType::Transport => self.put_u32_le(4, index),
            MessageType::Initiation => Err(PacketError::NoSuchField {
                message_type: MessageType::Initiation.as_byte(),
                field: "receiver_index",
            }),
        }
    }

    fn known_message_type(&self, _field: &'static str) -> Result<MessageType, PacketError> {
        if self.is_empty() {
            return Err(PacketError::Runt(0));
        }
        let byte = self.slice()[0];
        MessageType::from_byte(byte).ok_or(PacketError::UnknownMessageType(byte))
    }

    fn get_u32_le(&self, offset: usize) -> Result<u32, PacketError> {
        let data = self.slice();
        if data.len() < offset + 4 {
            return Err(PacketError::TooShort {
                offset,
                len: data.len(),
            });
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&data[offset..offset + 4]);
        Ok(u32::from_le_bytes(bytes))
    }

    fn put_u32_le(&mut self, offset: usize, value: u32) -> Result<(), PacketError> {
        let len = self.len();
        if len < offset + 4 {
            return Err(PacketError::TooShort { offset, len });
        }
        self.slice_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

/// Recompute mac1 (and mac2 when a fresh cookie is held) over an initiation
/// or response after its header was edited.
///
/// # Errors
///
/// Fails when the packet is not an initiation or response of its fixed size.
pub fn fix_macs(packet: &mut Packet, generator: &mut CookieGenerator) -> Result<(), PacketError> {
    let expected = match packet.message_type() {
        Some(MessageType::Initiation) => MESSAGE_INITIATION_SIZE,
        Some(MessageType::Response) => MESSAGE_RESPONSE_SIZE,
        Some(other) => {
            return Err(PacketError::NoSuchField {
                message_type: other.as_byte(),
                field: "mac1",
            })
        }
        None => return Err(PacketError::Runt(packet.len())),
    };
    if packet.len() < expected {
        return Err(PacketError::TooShort {
            offset: expected,
            len: packet.len(),
        });
    }
    generator.add_macs(&mut packet.slice_mut()[..expected]);
    Ok(())
}
