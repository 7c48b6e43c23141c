use byteorder::{ByteOrder, LittleEndian};
use quinn::{RecvStream, SendStream};

use super::{wire::WireMessage, MAX_FRAME_LEN};
use crate::error::{Error, Result};

/// Writes `len | msg` frames onto a QUIC send stream.
pub struct FrameSendStream(SendStream);

impl FrameSendStream {
    pub fn new(stream: SendStream) -> Self {
        Self(stream)
    }

    pub async fn send<M: WireMessage>(&mut self, msg: &M) -> Result<()> {
        let msg = msg.encode()?;
        let len = msg.len();
        if len > MAX_FRAME_LEN as usize {
            return Err(Error::MessageLengthOverflowed);
        }
        let mut buf = Vec::with_capacity(4 + len);
        let mut len_buf = [0u8; 4];
        LittleEndian::write_u32(&mut len_buf, len as u32);
        buf.extend_from_slice(&len_buf);
        buf.extend_from_slice(&msg);
        self.0.write_all(&buf).await?;
        Ok(())
    }

    /// Marks the stream as done; no more frames follow.
    pub async fn finish(mut self) -> Result<()> {
        self.0.finish().await?;
        Ok(())
    }
}

/// Reads `len | msg` frames off a QUIC receive stream.
pub struct FrameRecvStream(RecvStream);

impl FrameRecvStream {
    pub fn new(stream: RecvStream) -> Self {
        Self(stream)
    }

    pub async fn receive<M: WireMessage>(&mut self) -> Result<M> {
        let mut len_buf = [0u8; 4];
        self.0.read_exact(&mut len_buf).await?;
        let len = LittleEndian::read_u32(&len_buf);
        if len > MAX_FRAME_LEN {
            return Err(Error::MessageLengthOverflowed);
        }
        let mut msg_buf = vec![0u8; len as usize];
        self.0.read_exact(&mut msg_buf).await?;
        M::decode(&msg_buf)
    }
}
