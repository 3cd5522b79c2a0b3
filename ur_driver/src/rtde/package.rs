use bytes::{Buf, BufMut, Bytes, BytesMut};
use int_enum::IntEnum;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{DriverError, Result};

pub const HEADER_SIZE: usize = 3;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum PackageType {
    RequestProtocolVersion = 86,
    GetUrControlVersion = 118,
    TextMessage = 77,
    DataPackage = 85,
    SetupOutputs = 79,
    SetupInputs = 73,
    Start = 83,
    Pause = 80,
}

/// One package of the cyclic protocol, header stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPackage {
    pub kind: PackageType,
    pub payload: Bytes,
}

pub fn encode_package(kind: PackageType, payload: &[u8]) -> Result<Bytes> {
    let size = HEADER_SIZE + payload.len();
    let size = u16::try_from(size)
        .map_err(|_| DriverError::InvalidArgument(format!("{kind:?} package of {size} bytes is too large")))?;
    let mut buf = BytesMut::with_capacity(size as usize);
    buf.put_u16(size);
    buf.put_u8(kind.into());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Splits one complete package off `buf`. `Ok(None)` means more bytes are
/// needed.
pub fn try_decode(buf: &mut BytesMut) -> Result<Option<RawPackage>> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }
    let size = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if size < HEADER_SIZE {
        return Err(DriverError::Protocol(format!("package size {size} smaller than its header")));
    }
    if buf.len() < size {
        return Ok(None);
    }
    let mut frame = buf.split_to(size);
    frame.advance(2);
    let raw_kind = frame.get_u8();
    let kind = PackageType::try_from(raw_kind)
        .map_err(|_| DriverError::Protocol(format!("unknown package type {raw_kind}")))?;
    Ok(Some(RawPackage {
        kind,
        payload: frame.freeze(),
    }))
}

/// Reads exactly one package from `reader`.
pub async fn read_package<R>(reader: &mut R) -> Result<RawPackage>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await.map_err(eof_is_lost)?;
    let size = u16::from_be_bytes([header[0], header[1]]) as usize;
    if size < HEADER_SIZE {
        return Err(DriverError::Protocol(format!("package size {size} smaller than its header")));
    }
    let mut payload = vec![0u8; size - HEADER_SIZE];
    reader.read_exact(&mut payload).await.map_err(eof_is_lost)?;
    let kind = PackageType::try_from(header[2])
        .map_err(|_| DriverError::Protocol(format!("unknown package type {}", header[2])))?;
    Ok(RawPackage {
        kind,
        payload: Bytes::from(payload),
    })
}

fn eof_is_lost(e: std::io::Error) -> DriverError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        DriverError::ConnectionLost("robot closed the cyclic exchange socket".to_string())
    } else {
        DriverError::Io(e)
    }
}

/// Renders a text message payload as `source: message`.
///
/// Protocol 2 layout: `u8` length + message, `u8` length + source, `u8`
/// warning level. Anything else is shown raw.
pub fn text_message(payload: &[u8]) -> String {
    fn take_str(buf: &mut &[u8]) -> Option<String> {
        let len = *buf.first()? as usize;
        let text = String::from_utf8_lossy(buf.get(1..1 + len)?).to_string();
        *buf = &buf[1 + len..];
        Some(text)
    }

    let mut buf = payload;
    match (take_str(&mut buf), take_str(&mut buf)) {
        (Some(message), Some(source)) if buf.len() == 1 => format!("{source}: {message}"),
        _ => String::from_utf8_lossy(payload).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_counts_itself() {
        let bytes = encode_package(PackageType::RequestProtocolVersion, &[0, 2]).unwrap();
        assert_eq!(&bytes[..], &[0, 5, 86, 0, 2]);
    }

    #[test]
    fn test_decode_waits_for_whole_package() {
        let bytes = encode_package(PackageType::Start, &[1]).unwrap();
        let mut buf = BytesMut::from(&bytes[..3]);
        assert_eq!(try_decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&bytes[3..]);
        buf.extend_from_slice(&[0, 3]);
        let package = try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(package.kind, PackageType::Start);
        assert_eq!(&package.payload[..], &[1]);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let mut buf = BytesMut::from(&[0u8, 3, b'z'][..]);
        assert!(matches!(try_decode(&mut buf), Err(DriverError::Protocol(_))));
    }

    #[test]
    fn test_text_message_layout() {
        let mut payload = vec![5];
        payload.extend_from_slice(b"hello");
        payload.push(3);
        payload.extend_from_slice(b"rtd");
        payload.push(1);
        assert_eq!(text_message(&payload), "rtd: hello");
        assert_eq!(text_message(b"raw"), "raw");
    }

    #[tokio::test]
    async fn test_read_package_eof_is_connection_lost() {
        let mut reader: &[u8] = &[0, 9, 85, 1];
        assert!(matches!(
            read_package(&mut reader).await,
            Err(DriverError::ConnectionLost(_))
        ));
    }
}
