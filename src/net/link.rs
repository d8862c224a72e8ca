use byteorder::{ByteOrder, LittleEndian};
use chrono::Utc;
use quinn::{ReadExactError, RecvStream, SendStream};
use rkyv::AlignedVec;
use tracing::trace;

use super::{
    error::Error::{self, *},
    wire::{seal, Frame, MAX_FRAME_LEN, PREFIX_LEN},
};

/// The sending half of a framed QUIC stream.
pub struct FrameSendStream(SendStream);

impl FrameSendStream {
    pub fn new(stream: SendStream) -> Self {
        Self(stream)
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), Error> {
        let payload = frame.encode()?;
        let buf = seal(&payload, Utc::now().timestamp_micros())?;
        self.0.write_all(&buf).await?;
        Ok(())
    }

    /// Signals the end of the stream and waits for the peer to have received
    /// everything sent on it.
    pub async fn finish(mut self) -> Result<(), Error> {
        self.0.finish().await?;
        Ok(())
    }
}

/// The receiving half of a framed QUIC stream.
pub struct FrameRecvStream(RecvStream);

impl FrameRecvStream {
    pub fn new(stream: RecvStream) -> Self {
        Self(stream)
    }

    /// Reads the next frame, or `None` if the peer finished the stream on a
    /// frame boundary.
    pub async fn recv(&mut self) -> Result<Option<Frame>, Error> {
        // len | sent_at | payload
        let mut prefix = [0u8; PREFIX_LEN];
        match self.0.read_exact(&mut prefix).await {
            Ok(()) => {}
            Err(ReadExactError::FinishedEarly) => return Ok(None),
            Err(e) => Err(e)?,
        }
        let len = LittleEndian::read_u32(&prefix[0..4]);
        let sent_at = LittleEndian::read_i64(&prefix[4..]);
        if len > MAX_FRAME_LEN {
            Err(MessageLengthOverflowed)?
        }

        let mut payload = AlignedVec::with_capacity(len as usize);
        payload.resize(len as usize, 0);
        self.0.read_exact(payload.as_mut_slice()).await?;
        let frame = Frame::decode(&payload)?;
        trace!(
            kind = frame.kind(),
            len,
            latency_us = Utc::now().timestamp_micros() - sent_at,
            "received frame"
        );
        Ok(Some(frame))
    }

    /// Reads a frame that must be there.
    pub async fn expect(&mut self) -> Result<Frame, Error> {
        self.recv().await?.ok_or(StreamClosed)
    }
}

/// Opens a bidirectional framed stream on `conn`. The peer only sees the
/// stream once something has been sent on it.
pub async fn open(
    conn: &quinn::Connection,
) -> Result<(FrameSendStream, FrameRecvStream), Error> {
    let (send, recv) = conn.open_bi().await?;
    Ok((FrameSendStream::new(send), FrameRecvStream::new(recv)))
}

/// Accepts the next bidirectional framed stream the peer opens on `conn`.
pub async fn accept(
    conn: &quinn::Connection,
) -> Result<(FrameSendStream, FrameRecvStream), Error> {
    let (send, recv) = conn.accept_bi().await?;
    Ok((FrameSendStream::new(send), FrameRecvStream::new(recv)))
}
