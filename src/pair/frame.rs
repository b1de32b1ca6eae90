/**
 * Relay frame carried on the control connection from the primary to the alternate.
 *
 * +--------+------------+------------+------------+---------+
 * | length | remote IP  | remote port| local port | payload |
 * | 2      | 4          | 2          | 2          | length  |
 * +--------+------------+------------+------------+---------+
 *
 * All integers are big-endian. `length` counts the payload only.
 */
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::stun::error::{StunError, StunResult};
use crate::stun::reader::StunReader;

pub const FRAME_HEADER_LENGTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    /// where the alternate sends the payload
    pub remote: SocketAddrV4,
    /// local port the alternate sends from
    pub local_port: u16,
    pub payload: Vec<u8>,
}

impl RelayFrame {
    pub fn new(remote: SocketAddrV4, local_port: u16, payload: &[u8]) -> Self {
        Self {
            remote,
            local_port,
            payload: payload.to_vec(),
        }
    }

    pub fn encode(&self) -> StunResult<Vec<u8>> {
        let length = u16::try_from(self.payload.len()).map_err(|_| StunError::MalformedMessage)?;
        let mut buf = Vec::with_capacity(FRAME_HEADER_LENGTH + self.payload.len());
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(&self.remote.ip().octets());
        buf.extend_from_slice(&self.remote.port().to_be_bytes());
        buf.extend_from_slice(&self.local_port.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decode one complete frame from the start of `bytes`, returning it and the bytes consumed
    pub fn decode(bytes: &[u8]) -> StunResult<(Self, usize)> {
        let mut reader = StunReader::new(bytes);
        let length = reader.read_u16()? as usize;
        let ip = Ipv4Addr::from(reader.read_array::<4>()?);
        let remote_port = reader.read_u16()?;
        let local_port = reader.read_u16()?;
        let payload = reader.read_bytes(length)?;
        Ok((
            RelayFrame::new(SocketAddrV4::new(ip, remote_port), local_port, payload),
            FRAME_HEADER_LENGTH + length,
        ))
    }

    /**
     * Read exactly one frame from a byte stream: the fixed header first, then exactly the
     * announced number of payload bytes.
     */
    pub async fn read_from<R>(reader: &mut R) -> io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; FRAME_HEADER_LENGTH];
        reader.read_exact(&mut buf).await?;

        let length = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        buf.resize(FRAME_HEADER_LENGTH + length, 0);
        reader.read_exact(&mut buf[FRAME_HEADER_LENGTH..]).await?;

        let (frame, _) = Self::decode(&buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(frame)
    }
}
