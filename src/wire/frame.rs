use crate::error::{Result, SwarmError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame accepted from the network (64 MiB)
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Unit of transfer on every connection.
///
/// Format: `<u32 length><kind><payload>`, where `length` counts the kind byte
/// plus the payload. Piece bytes travel in their own frame kind, so a
/// receiver always knows the exact byte count before reading binary data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 JSON request or response
    Message(Bytes),
    /// Raw piece contents
    Piece(Bytes),
}

impl Frame {
    /// Frame kind tags
    const MESSAGE: u8 = 0;
    const PIECE: u8 = 1;

    pub fn to_bytes(&self) -> Bytes {
        let (kind, payload) = match self {
            Frame::Message(payload) => (Self::MESSAGE, payload),
            Frame::Piece(payload) => (Self::PIECE, payload),
        };

        let mut buf = BytesMut::with_capacity(5 + payload.len());
        buf.put_u32((1 + payload.len()) as u32);
        buf.put_u8(kind);
        buf.put_slice(payload);
        buf.freeze()
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let payload_len = match self {
            Frame::Message(p) | Frame::Piece(p) => p.len(),
        };
        if payload_len + 1 > MAX_FRAME_LEN {
            return Err(SwarmError::Protocol(format!(
                "Frame of {} bytes exceeds limit",
                payload_len + 1
            )));
        }

        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let length = reader.read_u32().await? as usize;

        if length == 0 {
            return Err(SwarmError::Protocol("Empty frame".to_string()));
        }
        if length > MAX_FRAME_LEN {
            return Err(SwarmError::Protocol(format!(
                "Frame of {} bytes exceeds limit",
                length
            )));
        }

        let mut buf = vec![0u8; length];
        reader.read_exact(&mut buf).await?;

        let mut data = Bytes::from(buf);
        let kind = data.get_u8();

        match kind {
            Self::MESSAGE => Ok(Frame::Message(data)),
            Self::PIECE => Ok(Frame::Piece(data)),
            _ => Err(SwarmError::Protocol(format!("Unknown frame kind: {}", kind))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piece_frame_layout() {
        let frame = Frame::Piece(Bytes::from_static(b"IJ"));
        assert_eq!(&frame.to_bytes()[..], &[0, 0, 0, 3, 1, b'I', b'J']);
    }

    #[tokio::test]
    async fn test_read_frame_split_across_reads() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&[0, 0])
            .read(&[0, 5, 1, 0x00, b'\n'])
            .read(&[b'}', 0xff])
            .build();

        let frame = Frame::read_from(&mut reader).await.unwrap();
        // Binary payload may contain delimiters and NULs
        assert_eq!(frame, Frame::Piece(Bytes::from_static(&[0x00, b'\n', b'}', 0xff])));
    }

    #[tokio::test]
    async fn test_write_frame() {
        let mut writer = tokio_test::io::Builder::new()
            .write(&[0, 0, 0, 3, 0, b'{', b'}'])
            .build();

        Frame::Message(Bytes::from_static(b"{}"))
            .write_to(&mut writer)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_back_to_back_frames() {
        let (mut client, mut server) = tokio::io::duplex(64);
        Frame::Message(Bytes::from_static(b"{\"type\":\"list\"}"))
            .write_to(&mut client)
            .await
            .unwrap();
        Frame::Piece(Bytes::from_static(b"ABCD"))
            .write_to(&mut client)
            .await
            .unwrap();

        assert!(matches!(
            Frame::read_from(&mut server).await.unwrap(),
            Frame::Message(_)
        ));
        assert_eq!(
            Frame::read_from(&mut server).await.unwrap(),
            Frame::Piece(Bytes::from_static(b"ABCD"))
        );
    }

    #[tokio::test]
    async fn test_rejects_oversized_and_unknown_frames() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes())
            .build();
        assert!(matches!(
            Frame::read_from(&mut reader).await.unwrap_err(),
            SwarmError::Protocol(_)
        ));

        let mut reader = tokio_test::io::Builder::new()
            .read(&[0, 0, 0, 1, 9])
            .build();
        assert!(matches!(
            Frame::read_from(&mut reader).await.unwrap_err(),
            SwarmError::Protocol(_)
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&[0, 0, 0, 9, 1, b'A'])
            .build();
        assert!(matches!(
            Frame::read_from(&mut reader).await.unwrap_err(),
            SwarmError::Io(_)
        ));
    }
}
