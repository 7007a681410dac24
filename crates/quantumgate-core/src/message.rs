//! Inner messages (§3, §4.4, §6): the typed units carried inside a
//! transport frame's decrypted payload, subject to compression and
//! fragmentation.

use quantumgate_crypto::compress::{compress, decompress};

use crate::error::PeerError;
use crate::uuid::PeerUuid;

/// Maximum inner-message payload size after compression/reassembly
/// (§3: `MaxInnerData`).
pub const MAX_INNER_DATA: usize = 2 * 1024 * 1024;

/// The enumerated message kind (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    /// Decoy traffic, dropped after accounting.
    Noise = 0,
    /// Inbound side begins meta exchange.
    BeginMetaExchange = 1,
    /// Outbound side's meta exchange reply.
    EndMetaExchange = 2,
    /// Inbound side begins the primary (DH-style) leg.
    BeginPrimaryKeyExchange = 3,
    /// Outbound side's primary leg reply.
    EndPrimaryKeyExchange = 4,
    /// Inbound side begins the secondary (KEM-style) leg.
    BeginSecondaryKeyExchange = 5,
    /// Outbound side's secondary leg reply.
    EndSecondaryKeyExchange = 6,
    /// Inbound side begins authentication.
    BeginAuthentication = 7,
    /// Outbound side's authentication reply.
    EndAuthentication = 8,
    /// Inbound side begins session init.
    BeginSessionInit = 9,
    /// Outbound side's session init reply.
    EndSessionInit = 10,
    /// Application-level extender payload.
    ExtenderCommunication = 11,
    /// Locally-enabled extender set changed.
    ExtenderUpdate = 12,
    /// Relay link creation request.
    RelayCreate = 13,
    /// Relay link lifecycle event.
    RelayStatus = 14,
    /// Opaque relay payload.
    RelayData = 15,
    /// Relay flow-control acknowledgement.
    RelayDataAck = 16,
    /// Inbound side begins a primary key update.
    BeginPrimaryKeyUpdateExchange = 17,
    /// Outbound side's primary key update reply.
    EndPrimaryKeyUpdateExchange = 18,
    /// Inbound side begins a secondary key update.
    BeginSecondaryKeyUpdateExchange = 19,
    /// Outbound side's secondary key update reply.
    EndSecondaryKeyUpdateExchange = 20,
    /// Key update completed and is ready for use.
    KeyUpdateReady = 21,
}

impl MessageKind {
    /// Parse from the wire `u16` tag.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        use MessageKind::*;
        Some(match value {
            0 => Noise,
            1 => BeginMetaExchange,
            2 => EndMetaExchange,
            3 => BeginPrimaryKeyExchange,
            4 => EndPrimaryKeyExchange,
            5 => BeginSecondaryKeyExchange,
            6 => EndSecondaryKeyExchange,
            7 => BeginAuthentication,
            8 => EndAuthentication,
            9 => BeginSessionInit,
            10 => EndSessionInit,
            11 => ExtenderCommunication,
            12 => ExtenderUpdate,
            13 => RelayCreate,
            14 => RelayStatus,
            15 => RelayData,
            16 => RelayDataAck,
            17 => BeginPrimaryKeyUpdateExchange,
            18 => EndPrimaryKeyUpdateExchange,
            19 => BeginSecondaryKeyUpdateExchange,
            20 => EndSecondaryKeyUpdateExchange,
            21 => KeyUpdateReady,
            _ => return None,
        })
    }
}

/// Fragment role of an inner message (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FragmentKind {
    /// The entire message fits in one inner message.
    Complete = 0,
    /// First fragment of a split message.
    PartialBegin = 1,
    /// A middle fragment.
    Partial = 2,
    /// The final fragment.
    PartialEnd = 3,
}

impl FragmentKind {
    /// Parse from the 2-bit wire tag.
    #[must_use]
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Complete),
            1 => Some(Self::PartialBegin),
            2 => Some(Self::Partial),
            3 => Some(Self::PartialEnd),
            _ => None,
        }
    }
}

/// One inner message (§6 wire encoding: `{kind: u16, flags: u8, [extender_uuid],
/// data_length, data}`).
#[derive(Debug, Clone)]
pub struct InnerMessage {
    /// What kind of message this is.
    pub kind: MessageKind,
    /// Fragment role.
    pub fragment_kind: FragmentKind,
    /// Whether to zstd-compress `data` on the wire (§4.4 `COMPRESSION`
    /// category). `data` itself always holds the logical, uncompressed
    /// payload; compression happens only inside [`InnerMessage::encode`]
    /// and is reversed inside [`InnerMessage::decode`].
    pub compressed: bool,
    /// Present for `ExtenderCommunication`/`ExtenderUpdate` messages.
    pub extender_uuid: Option<PeerUuid>,
    /// Message payload, always uncompressed in memory.
    pub data: Vec<u8>,
}

const FLAG_FRAGMENT_MASK: u8 = 0b0000_0011;
const FLAG_COMPRESSED: u8 = 0b0000_0100;
const FLAG_HAS_EXTENDER_UUID: u8 = 0b0000_1000;

impl InnerMessage {
    /// Construct a complete (non-fragmented), uncompressed inner message.
    #[must_use]
    pub fn complete(kind: MessageKind, data: Vec<u8>) -> Self {
        Self { kind, fragment_kind: FragmentKind::Complete, compressed: false, extender_uuid: None, data }
    }

    /// Attach an extender UUID (for `ExtenderCommunication`/`ExtenderUpdate`).
    #[must_use]
    pub fn with_extender(mut self, uuid: PeerUuid) -> Self {
        self.extender_uuid = Some(uuid);
        self
    }

    /// Encode this inner message to its wire representation. Integers are
    /// little-endian throughout (§6). When `compressed` is set, `data` is
    /// zstd-compressed before being written; the length prefix covers the
    /// bytes actually on the wire.
    pub fn encode(&self) -> Result<Vec<u8>, PeerError> {
        let mut flags = self.fragment_kind as u8 & FLAG_FRAGMENT_MASK;
        if self.compressed {
            flags |= FLAG_COMPRESSED;
        }
        if self.extender_uuid.is_some() {
            flags |= FLAG_HAS_EXTENDER_UUID;
        }

        let wire_data = if self.compressed {
            compress(&self.data).map_err(|_| PeerError::FragmentError("compression failed".into()))?
        } else {
            self.data.clone()
        };

        let mut out = Vec::with_capacity(2 + 1 + 16 + 4 + wire_data.len());
        out.extend_from_slice(&(self.kind as u16).to_le_bytes());
        out.push(flags);
        if let Some(uuid) = &self.extender_uuid {
            out.extend_from_slice(&uuid.to_bytes());
        }
        out.extend_from_slice(&(wire_data.len() as u32).to_le_bytes());
        out.extend_from_slice(&wire_data);
        Ok(out)
    }

    /// Decode one inner message from the front of `buf`, returning the
    /// message and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), PeerError> {
        if buf.len() < 3 {
            return Err(PeerError::Recoverable("inner message header truncated".into()));
        }
        let kind_raw = u16::from_le_bytes([buf[0], buf[1]]);
        let kind = MessageKind::from_u16(kind_raw).ok_or_else(|| PeerError::UnexpectedMessage {
            kind: format!("0x{kind_raw:04x}").into(),
            state: "decode".into(),
        })?;
        let flags = buf[2];
        let fragment_kind = FragmentKind::from_bits(flags & FLAG_FRAGMENT_MASK)
            .ok_or_else(|| PeerError::FragmentError("invalid fragment kind bits".into()))?;
        let compressed = flags & FLAG_COMPRESSED != 0;
        let has_extender = flags & FLAG_HAS_EXTENDER_UUID != 0;

        let mut offset = 3;
        let extender_uuid = if has_extender {
            if buf.len() < offset + 16 {
                return Err(PeerError::Recoverable("extender uuid truncated".into()));
            }
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&buf[offset..offset + 16]);
            offset += 16;
            Some(PeerUuid::from_bytes(raw).ok_or_else(|| PeerError::FragmentError("bad extender uuid".into()))?)
        } else {
            None
        };

        if buf.len() < offset + 4 {
            return Err(PeerError::Recoverable("data length truncated".into()));
        }
        let data_len = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4;

        if data_len > MAX_INNER_DATA {
            return Err(PeerError::TooMuchData("inner message exceeds MaxInnerData".into()));
        }
        if buf.len() < offset + data_len {
            return Err(PeerError::Recoverable("data truncated".into()));
        }
        let wire_data = &buf[offset..offset + data_len];
        let data = if compressed {
            let decoded = decompress(wire_data).map_err(|_| PeerError::FragmentError("decompression failed".into()))?;
            if decoded.len() > MAX_INNER_DATA {
                return Err(PeerError::TooMuchData("decompressed inner message exceeds MaxInnerData".into()));
            }
            decoded
        } else {
            wire_data.to_vec()
        };
        offset += data_len;

        Ok((Self { kind, fragment_kind, compressed, extender_uuid, data }, offset))
    }
}

/// Split an oversized payload into `PartialBegin`, zero or more `Partial`,
/// and a final `PartialEnd`, all sharing `kind` and `extender_uuid` (§4.4).
#[must_use]
pub fn fragment(kind: MessageKind, extender_uuid: Option<PeerUuid>, data: &[u8]) -> Vec<InnerMessage> {
    if data.len() <= MAX_INNER_DATA {
        let mut msg = InnerMessage::complete(kind, data.to_vec());
        msg.extender_uuid = extender_uuid;
        return vec![msg];
    }

    let mut out = Vec::new();
    let mut chunks = data.chunks(MAX_INNER_DATA).peekable();
    let mut first = true;
    while let Some(chunk) = chunks.next() {
        let fragment_kind = if first {
            FragmentKind::PartialBegin
        } else if chunks.peek().is_some() {
            FragmentKind::Partial
        } else {
            FragmentKind::PartialEnd
        };
        first = false;
        out.push(InnerMessage {
            kind,
            fragment_kind,
            compressed: false,
            extender_uuid,
            data: chunk.to_vec(),
        });
    }
    out
}

/// Holds at most one in-progress fragment reassembly per direction (§4.4:
/// "the receiver holds at most one in-progress reassembly slot").
#[derive(Default)]
pub struct Reassembler {
    in_progress: Option<(MessageKind, Option<PeerUuid>, Vec<u8>)>,
}

impl Reassembler {
    /// Fresh, empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one inner message in. Returns `Some(complete_payload)` once a
    /// full message (complete or fully reassembled) is available.
    pub fn push(&mut self, msg: InnerMessage) -> Result<Option<(MessageKind, Option<PeerUuid>, Vec<u8>)>, PeerError> {
        match msg.fragment_kind {
            FragmentKind::Complete => {
                if self.in_progress.is_some() {
                    return Err(PeerError::FragmentError(
                        "complete message arrived mid-reassembly".into(),
                    ));
                }
                Ok(Some((msg.kind, msg.extender_uuid, msg.data)))
            }
            FragmentKind::PartialBegin => {
                if self.in_progress.is_some() {
                    return Err(PeerError::FragmentError("PartialBegin while already reassembling".into()));
                }
                self.in_progress = Some((msg.kind, msg.extender_uuid, msg.data));
                Ok(None)
            }
            FragmentKind::Partial | FragmentKind::PartialEnd => {
                let (kind, extender_uuid, buf) = self
                    .in_progress
                    .as_mut()
                    .ok_or_else(|| PeerError::FragmentError("fragment with no reassembly in progress".into()))?;
                if *kind != msg.kind || *extender_uuid != msg.extender_uuid {
                    return Err(PeerError::FragmentError("fragment kind/extender mismatch".into()));
                }
                buf.extend_from_slice(&msg.data);
                if buf.len() > MAX_INNER_DATA * 64 {
                    return Err(PeerError::TooMuchData("reassembled message too large".into()));
                }
                if matches!(msg.fragment_kind, FragmentKind::PartialEnd) {
                    let (kind, extender_uuid, buf) = self.in_progress.take().unwrap();
                    Ok(Some((kind, extender_uuid, buf)))
                } else {
                    Ok(None)
                }
            }
        }
    }
}
