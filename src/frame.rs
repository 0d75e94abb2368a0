//! RSocket wire frame codec (§6.1).
//!
//! Binary layout (all fields big-endian):
//!
//! ```text
//! +------------------+------------------+--- variable ---+
//! | stream id (31b)  | type(6b) flags(10b) |  body (N)   |
//! | u32, MSB rsvd=0  |        u16           |             |
//! +------------------+------------------+-----------------+
//! ```
//!
//! Out-of-scope connection frames (SETUP, KEEPALIVE) are represented as
//! opaque bodies: the core must recognize them crossing the wire without
//! choking, but implements no negotiation/keepalive behavior (§1 Non-goals).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RequesterError, Result};
use crate::stream_id::StreamId;

/// Frame type discriminants, matching the RSocket 1.0 reference encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Setup = 0x01,
    Keepalive = 0x03,
    RequestResponse = 0x04,
    RequestFnf = 0x05,
    RequestStream = 0x06,
    RequestChannel = 0x07,
    RequestN = 0x08,
    Cancel = 0x09,
    Payload = 0x0A,
    Error = 0x0B,
    MetadataPush = 0x0C,
}

impl TryFrom<u8> for FrameType {
    type Error = RequesterError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FrameType::Setup),
            0x03 => Ok(FrameType::Keepalive),
            0x04 => Ok(FrameType::RequestResponse),
            0x05 => Ok(FrameType::RequestFnf),
            0x06 => Ok(FrameType::RequestStream),
            0x07 => Ok(FrameType::RequestChannel),
            0x08 => Ok(FrameType::RequestN),
            0x09 => Ok(FrameType::Cancel),
            0x0A => Ok(FrameType::Payload),
            0x0B => Ok(FrameType::Error),
            0x0C => Ok(FrameType::MetadataPush),
            other => Err(RequesterError::UnknownFrameType(other)),
        }
    }
}

/// Frame header flags. Only the low 10 bits are meaningful on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(pub u16);

impl Flags {
    pub const NONE: Self = Self(0x0000);
    pub const METADATA: Self = Self(0x01 << 8);
    pub const FOLLOWS: Self = Self(0x01 << 7);
    pub const COMPLETE: Self = Self(0x01 << 6);
    pub const NEXT: Self = Self(0x01 << 5);
    pub const RESUME_ENABLE: Self = Self(0x01 << 7);
    pub const LEASE: Self = Self(0x01 << 6);
    pub const RESPOND: Self = Self(0x01 << 7);
    pub const IGNORE: Self = Self(0x01 << 9);

    pub fn contains(self, flag: Flags) -> bool {
        (self.0 & flag.0) == flag.0
    }

    pub fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        self.union(rhs)
    }
}

/// A decoded/encodable RSocket frame.
///
/// `Payload`'s `metadata: Option<Bytes>` mirrors the METADATA flag: `Some`
/// (even empty) means the flag is set and a length-prefixed metadata blob
/// follows; `None` means the flag is clear and no metadata blob is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// SETUP: opaque body, not interpreted by the core.
    Setup { raw: Bytes },
    /// KEEPALIVE: opaque body, not interpreted by the core.
    Keepalive { raw: Bytes },
    RequestResponse {
        stream_id: StreamId,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    RequestFnf {
        stream_id: StreamId,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    RequestStream {
        stream_id: StreamId,
        initial_request_n: u32,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    RequestChannel {
        stream_id: StreamId,
        initial_request_n: u32,
        complete: bool,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    RequestN {
        stream_id: StreamId,
        n: u32,
    },
    Cancel {
        stream_id: StreamId,
    },
    Payload {
        stream_id: StreamId,
        next: bool,
        complete: bool,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    Error {
        stream_id: StreamId,
        code: u32,
        message: String,
    },
    MetadataPush {
        metadata: Bytes,
    },
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Setup { .. } => FrameType::Setup,
            Frame::Keepalive { .. } => FrameType::Keepalive,
            Frame::RequestResponse { .. } => FrameType::RequestResponse,
            Frame::RequestFnf { .. } => FrameType::RequestFnf,
            Frame::RequestStream { .. } => FrameType::RequestStream,
            Frame::RequestChannel { .. } => FrameType::RequestChannel,
            Frame::RequestN { .. } => FrameType::RequestN,
            Frame::Cancel { .. } => FrameType::Cancel,
            Frame::Payload { .. } => FrameType::Payload,
            Frame::Error { .. } => FrameType::Error,
            Frame::MetadataPush { .. } => FrameType::MetadataPush,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Setup { .. } | Frame::Keepalive { .. } | Frame::MetadataPush { .. } => 0,
            Frame::RequestResponse { stream_id, .. }
            | Frame::RequestFnf { stream_id, .. }
            | Frame::RequestStream { stream_id, .. }
            | Frame::RequestChannel { stream_id, .. }
            | Frame::RequestN { stream_id, .. }
            | Frame::Cancel { stream_id }
            | Frame::Payload { stream_id, .. }
            | Frame::Error { stream_id, .. } => *stream_id,
        }
    }

    fn flags(&self) -> Flags {
        match self {
            Frame::Setup { .. } | Frame::Keepalive { .. } => Flags::NONE,
            Frame::RequestResponse { metadata, .. } | Frame::RequestFnf { metadata, .. } => {
                metadata_flag(metadata)
            }
            Frame::RequestStream { metadata, .. } => metadata_flag(metadata),
            Frame::RequestChannel {
                metadata, complete, ..
            } => {
                let mut f = metadata_flag(metadata);
                if *complete {
                    f = f | Flags::COMPLETE;
                }
                f
            }
            Frame::RequestN { .. } | Frame::Cancel { .. } | Frame::Error { .. } => Flags::NONE,
            Frame::Payload {
                metadata,
                next,
                complete,
                ..
            } => {
                let mut f = metadata_flag(metadata);
                if *next {
                    f = f | Flags::NEXT;
                }
                if *complete {
                    f = f | Flags::COMPLETE;
                }
                f
            }
            Frame::MetadataPush { .. } => Flags::METADATA,
        }
    }

    /// Encode this frame to a fresh buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.stream_id() & 0x7FFF_FFFF);
        let header = ((self.frame_type() as u16) << 10) | self.flags().0;
        buf.put_u16(header);

        match self {
            Frame::Setup { raw } | Frame::Keepalive { raw } => buf.put_slice(raw),
            Frame::RequestResponse { metadata, data, .. }
            | Frame::RequestFnf { metadata, data, .. } => {
                put_metadata_and_data(buf, metadata, data);
            }
            Frame::RequestStream {
                initial_request_n,
                metadata,
                data,
                ..
            } => {
                buf.put_u32(*initial_request_n);
                put_metadata_and_data(buf, metadata, data);
            }
            Frame::RequestChannel {
                initial_request_n,
                metadata,
                data,
                ..
            } => {
                buf.put_u32(*initial_request_n);
                put_metadata_and_data(buf, metadata, data);
            }
            Frame::RequestN { n, .. } => buf.put_u32(*n),
            Frame::Cancel { .. } => {}
            Frame::Payload { metadata, data, .. } => {
                put_metadata_and_data(buf, metadata, data);
            }
            Frame::Error { code, message, .. } => {
                buf.put_u32(*code);
                buf.put_slice(message.as_bytes());
            }
            Frame::MetadataPush { metadata } => buf.put_slice(metadata),
        }
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        Self::ensure_len(data, 6, "frame header")?;
        let stream_id = (&data[0..4]).get_u32() & 0x7FFF_FFFF;
        let header = (&data[4..6]).get_u16();
        data = &data[6..];

        let flags = Flags(header & 0x03FF);
        let frame_type = FrameType::try_from((header >> 10) as u8)?;
        let has_metadata = flags.contains(Flags::METADATA);

        match frame_type {
            FrameType::Setup => Ok(Frame::Setup {
                raw: Bytes::copy_from_slice(data),
            }),
            FrameType::Keepalive => Ok(Frame::Keepalive {
                raw: Bytes::copy_from_slice(data),
            }),
            FrameType::RequestResponse => {
                let (metadata, payload) = Self::take_metadata_and_data(data, has_metadata)?;
                Ok(Frame::RequestResponse {
                    stream_id,
                    metadata,
                    data: payload,
                })
            }
            FrameType::RequestFnf => {
                let (metadata, payload) = Self::take_metadata_and_data(data, has_metadata)?;
                Ok(Frame::RequestFnf {
                    stream_id,
                    metadata,
                    data: payload,
                })
            }
            FrameType::RequestStream => {
                Self::ensure_len(data, 4, "REQUEST_STREAM initial request n")?;
                let initial_request_n = (&data[0..4]).get_u32();
                let (metadata, payload) =
                    Self::take_metadata_and_data(&data[4..], has_metadata)?;
                Ok(Frame::RequestStream {
                    stream_id,
                    initial_request_n,
                    metadata,
                    data: payload,
                })
            }
            FrameType::RequestChannel => {
                Self::ensure_len(data, 4, "REQUEST_CHANNEL initial request n")?;
                let initial_request_n = (&data[0..4]).get_u32();
                let (metadata, payload) =
                    Self::take_metadata_and_data(&data[4..], has_metadata)?;
                Ok(Frame::RequestChannel {
                    stream_id,
                    initial_request_n,
                    complete: flags.contains(Flags::COMPLETE),
                    metadata,
                    data: payload,
                })
            }
            FrameType::RequestN => {
                Self::ensure_len(data, 4, "REQUEST_N")?;
                let n = (&data[0..4]).get_u32();
                Ok(Frame::RequestN { stream_id, n })
            }
            FrameType::Cancel => Ok(Frame::Cancel { stream_id }),
            FrameType::Payload => {
                let (metadata, payload) = Self::take_metadata_and_data(data, has_metadata)?;
                Ok(Frame::Payload {
                    stream_id,
                    next: flags.contains(Flags::NEXT),
                    complete: flags.contains(Flags::COMPLETE),
                    metadata,
                    data: payload,
                })
            }
            FrameType::Error => {
                Self::ensure_len(data, 4, "ERROR code")?;
                let code = (&data[0..4]).get_u32();
                let message = String::from_utf8_lossy(&data[4..]).into_owned();
                Ok(Frame::Error {
                    stream_id,
                    code,
                    message,
                })
            }
            FrameType::MetadataPush => Ok(Frame::MetadataPush {
                metadata: Bytes::copy_from_slice(data),
            }),
        }
    }

    fn ensure_len(data: &[u8], needed: usize, context: &str) -> Result<()> {
        if data.len() < needed {
            Err(RequesterError::FrameTooShort {
                expected: needed,
                actual: data.len(),
            })
        } else {
            let _ = context;
            Ok(())
        }
    }

    /// Metadata is length-prefixed (u24) when present; data is everything
    /// remaining after it.
    fn take_metadata_and_data(data: &[u8], has_metadata: bool) -> Result<(Option<Bytes>, Bytes)> {
        if !has_metadata {
            return Ok((None, Bytes::copy_from_slice(data)));
        }
        Self::ensure_len(data, 3, "metadata length")?;
        let len = ((data[0] as usize) << 16) | ((data[1] as usize) << 8) | (data[2] as usize);
        let rest = &data[3..];
        Self::ensure_len(rest, len, "metadata body")?;
        let metadata = Bytes::copy_from_slice(&rest[..len]);
        let payload = Bytes::copy_from_slice(&rest[len..]);
        Ok((Some(metadata), payload))
    }
}

fn metadata_flag(metadata: &Option<Bytes>) -> Flags {
    if metadata.is_some() {
        Flags::METADATA
    } else {
        Flags::NONE
    }
}

fn put_metadata_and_data(buf: &mut BytesMut, metadata: &Option<Bytes>, data: &Bytes) {
    if let Some(m) = metadata {
        let len = m.len() as u32;
        buf.put_u8(((len >> 16) & 0xFF) as u8);
        buf.put_u8(((len >> 8) & 0xFF) as u8);
        buf.put_u8((len & 0xFF) as u8);
        buf.put_slice(m);
    }
    buf.put_slice(data);
}
