//! Length-delimited frames and the handful of packets inside them. A frame is
//! always buffered in full before any field decoding happens, so a slow or
//! hostile peer can't wedge a parser halfway through a packet.

use std::io::Cursor;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{MAX_FRAME_LEN, ProtocolError, codec, eof_as_truncated};

pub const HANDSHAKE_ID: i32 = 0x00;
pub const STATUS_REQUEST_ID: i32 = 0x00;
pub const STATUS_RESPONSE_ID: i32 = 0x00;
pub const PING_ID: i32 = 0x01;
pub const PONG_ID: i32 = 0x01;
pub const LOGIN_START_ID: i32 = 0x00;
pub const DISCONNECT_ID: i32 = 0x00;

/// One decoded frame: the packet id plus its undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: i32,
    pub body: Vec<u8>,
}

/// Reads `length (varint) | id (varint) | body` off the stream. Declared
/// lengths outside `1..=MAX_FRAME_LEN` are rejected before anything is
/// allocated.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let declared = codec::read_varint_async(reader).await?;
    if declared <= 0 || declared as usize > MAX_FRAME_LEN {
        return Err(ProtocolError::BadFrameLength { declared });
    }

    let mut raw = vec![0; declared as usize];
    reader.read_exact(&mut raw).await.map_err(eof_as_truncated)?;

    let mut cursor = Cursor::new(raw.as_slice());
    let id = codec::read_varint(&mut cursor)?;
    let body = raw[cursor.position() as usize..].to_vec();
    Ok(Frame { id, body })
}

/// Assembles the whole frame in memory and writes it with a single
/// `write_all`, so partial frames never hit the wire.
pub async fn write_frame<W>(writer: &mut W, id: i32, body: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let mut id_buffer = Vec::new();
    codec::write_varint(&mut id_buffer, id);

    let length = id_buffer.len() + body.len();
    if length > MAX_FRAME_LEN {
        return Err(ProtocolError::BadFrameLength {
            declared: length as i32,
        });
    }

    let mut frame = Vec::with_capacity(length + 3);
    codec::write_varint(&mut frame, length as i32);
    frame.extend_from_slice(&id_buffer);
    frame.extend_from_slice(body);

    writer.write_all(&frame).await.map_err(ProtocolError::Io)?;
    writer.flush().await.map_err(ProtocolError::Io)?;
    Ok(())
}

/// What the client wants after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Status,
    Login,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: NextState,
}

impl Handshake {
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(body);
        let protocol_version = codec::read_varint(&mut cursor)?;
        let server_address = codec::read_string(&mut cursor)?;
        let server_port = codec::read_ushort(&mut cursor)?;
        let next_state = match codec::read_varint(&mut cursor)? {
            1 => NextState::Status,
            2 => NextState::Login,
            other => return Err(ProtocolError::BadNextState(other)),
        };
        // proxies and modded clients append extra data here, ignore it
        Ok(Self {
            protocol_version,
            server_address,
            server_port,
            next_state,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        codec::write_varint(&mut body, self.protocol_version);
        codec::write_string(&mut body, &self.server_address);
        codec::write_ushort(&mut body, self.server_port);
        codec::write_varint(
            &mut body,
            match self.next_state {
                NextState::Status => 1,
                NextState::Login => 2,
            },
        );
        body
    }
}

/// First (and for us, only) login packet. Newer protocol versions append a
/// uuid and signature data after the name; none of it matters here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStart {
    pub player_name: String,
}

impl LoginStart {
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(body);
        let player_name = codec::read_string(&mut cursor)?;
        Ok(Self { player_name })
    }
}

/// A ping body is exactly one long, echoed back verbatim.
pub fn decode_ping(body: &[u8]) -> Result<i64, ProtocolError> {
    let mut cursor = Cursor::new(body);
    let token = codec::read_long(&mut cursor)?;
    let unread = body.len() - cursor.position() as usize;
    if unread > 0 {
        return Err(ProtocolError::TrailingData(unread));
    }
    Ok(token)
}
