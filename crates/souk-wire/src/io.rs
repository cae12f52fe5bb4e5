// Async framed IO over any byte stream. Readers enforce a max payload cap
// before allocating and reuse a scratch buffer across frames.
use bytes::BytesMut;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{BrokerMessage, Error, Frame, FrameHeader, Result};

/// Read one length-prefixed frame. Returns `Ok(None)` when the peer closed
/// the stream cleanly before a new header started.
pub async fn read_frame<R>(
    recv: &mut R,
    max_payload_bytes: usize,
    scratch: &mut BytesMut,
) -> std::io::Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; FrameHeader::LEN];
    match recv.read_exact(&mut header_bytes).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let length = u32::from_be_bytes(header_bytes) as usize;
    if length > max_payload_bytes {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            Error::FrameTooLarge(length),
        ));
    }
    scratch.clear();
    scratch.resize(length, 0u8);
    recv.read_exact(&mut scratch[..]).await?;
    Ok(Some(Frame {
        header: FrameHeader::new(length as u32),
        payload: scratch.split().freeze(),
    }))
}

/// Write one frame: header then payload.
pub async fn write_frame<W>(send: &mut W, frame: &Frame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut header_bytes = [0u8; FrameHeader::LEN];
    frame.header.encode_into(&mut header_bytes);
    send.write_all(&header_bytes).await?;
    send.write_all(&frame.payload).await?;
    send.flush().await
}

/// Read and decode one message. Framing errors surface as IO errors; a
/// frame that arrives intact but fails protobuf decoding is reported as
/// `Ok(Some(Err(_)))` so callers can count it and keep reading the stream.
pub async fn read_message<R>(
    recv: &mut R,
    max_payload_bytes: usize,
    scratch: &mut BytesMut,
) -> std::io::Result<Option<Result<BrokerMessage>>>
where
    R: AsyncRead + Unpin,
{
    let frame = match read_frame(recv, max_payload_bytes, scratch).await? {
        Some(frame) => frame,
        None => return Ok(None),
    };
    Ok(Some(BrokerMessage::from_frame(&frame)))
}

/// Encode and write one message.
pub async fn write_message<W>(send: &mut W, message: &BrokerMessage) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = message
        .to_frame()
        .map_err(|err| std::io::Error::new(ErrorKind::InvalidData, err))?;
    write_frame(send, &frame).await
}
