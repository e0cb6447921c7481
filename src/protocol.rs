//! The slice of the Minecraft wire protocol a sleeping server has to speak:
//! varint framing, handshakes, status queries and the start of a login.

use std::io;

use thiserror::Error;

pub mod codec;
pub mod packets;

/// Longest string field we accept, in bytes. Matches the limit the vanilla
/// client applies to the handshake hostname.
pub const MAX_STRING_LEN: usize = 32767;

/// Frame length ceiling. The protocol delimits packets with a 3 byte varint,
/// so nothing legitimate is ever bigger than this.
pub const MAX_FRAME_LEN: usize = (1 << 21) - 1;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("varint ran past 5 bytes")]
    MalformedVarInt,
    #[error("frame declared {declared} bytes")]
    BadFrameLength { declared: i32 },
    #[error("string field declared {declared} bytes (limit {MAX_STRING_LEN})")]
    OversizedField { declared: i32 },
    #[error("peer closed the stream mid-field")]
    TruncatedRead,
    #[error("string field is not utf-8")]
    BadUtf8,
    #[error("unexpected packet id {0:#04x}")]
    UnexpectedPacket(i32),
    #[error("packet has {0} bytes of trailing garbage")]
    TrailingData(usize),
    #[error("handshake next-state {0} is neither status nor login")]
    BadNextState(i32),
    #[error(transparent)]
    Io(io::Error),
}

/// A short read means the peer hung up in the middle of a field; everything
/// else stays an I/O error.
pub(crate) fn eof_as_truncated(err: io::Error) -> ProtocolError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ProtocolError::TruncatedRead
    } else {
        ProtocolError::Io(err)
    }
}
