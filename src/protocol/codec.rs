//! Primitive field codecs. The sync readers work off in-memory buffers
//! (frames are always read in full first), the async varint reader is the one
//! exception because frame lengths arrive straight off the socket.

use std::io::Read;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::{MAX_STRING_LEN, ProtocolError, eof_as_truncated};

pub fn read_varint(reader: &mut impl Read) -> Result<i32, ProtocolError> {
    let mut buffer = [0];
    let mut ans: u32 = 0;
    for i in 0..5 {
        reader.read_exact(&mut buffer).map_err(eof_as_truncated)?;
        ans |= ((buffer[0] & 0b0111_1111) as u32) << (7 * i);
        if buffer[0] & 0b1000_0000 == 0 {
            return Ok(ans as i32);
        }
    }
    // a continuation bit on the 5th byte would need a 6th
    Err(ProtocolError::MalformedVarInt)
}

/// Same decode as [`read_varint`] but pulls bytes off a stream, for the one
/// place a varint is read before the rest of its frame exists in memory.
pub async fn read_varint_async<R>(reader: &mut R) -> Result<i32, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut ans: u32 = 0;
    for i in 0..5 {
        let byte = reader.read_u8().await.map_err(eof_as_truncated)?;
        ans |= ((byte & 0b0111_1111) as u32) << (7 * i);
        if byte & 0b1000_0000 == 0 {
            return Ok(ans as i32);
        }
    }
    Err(ProtocolError::MalformedVarInt)
}

pub fn write_varint(buffer: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        let byte = (value & 0b0111_1111) as u8;
        value >>= 7;
        if value == 0 {
            buffer.push(byte);
            return;
        }
        buffer.push(byte | 0b1000_0000);
    }
}

/// Length check happens before the payload is touched, so a hostile length
/// prefix can't make us allocate gigabytes.
pub fn read_string(reader: &mut impl Read) -> Result<String, ProtocolError> {
    let declared = read_varint(reader)?;
    if declared < 0 || declared as usize > MAX_STRING_LEN {
        return Err(ProtocolError::OversizedField { declared });
    }
    let mut buffer = vec![0; declared as usize];
    reader.read_exact(&mut buffer).map_err(eof_as_truncated)?;
    String::from_utf8(buffer).map_err(|_| ProtocolError::BadUtf8)
}

pub fn write_string(buffer: &mut Vec<u8>, value: &str) {
    write_varint(buffer, value.len() as i32);
    buffer.extend_from_slice(value.as_bytes());
}

pub fn read_ushort(reader: &mut impl Read) -> Result<u16, ProtocolError> {
    let mut buffer = [0; 2];
    reader.read_exact(&mut buffer).map_err(eof_as_truncated)?;
    Ok(u16::from_be_bytes(buffer))
}

pub fn write_ushort(buffer: &mut Vec<u8>, value: u16) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

pub fn read_long(reader: &mut impl Read) -> Result<i64, ProtocolError> {
    let mut buffer = [0; 8];
    reader.read_exact(&mut buffer).map_err(eof_as_truncated)?;
    Ok(i64::from_be_bytes(buffer))
}

pub fn write_long(buffer: &mut Vec<u8>, value: i64) {
    buffer.extend_from_slice(&value.to_be_bytes());
}
