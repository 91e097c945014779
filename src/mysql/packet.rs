use super::{Error, Result};
use bytes::{BufMut, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::client::TlsStream;

/// Largest payload a single packet can carry
pub const MAX_PAYLOAD_LEN: usize = 0x00FF_FFFF;

/// TCP stream, plain or upgraded to TLS after `SSLRequest`
#[allow(clippy::large_enum_variant)]
pub enum Transport {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Transport::Plain(TcpStream)"),
            Self::Tls(_) => f.write_str("Transport::Tls(TlsStream)"),
        }
    }
}

impl Transport {
    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read_exact(buf).await,
            Self::Tls(stream) => stream.read_exact(buf).await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(buf).await,
            Self::Tls(stream) => stream.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush().await,
            Self::Tls(stream) => stream.flush().await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.shutdown().await,
            Self::Tls(stream) => stream.shutdown().await,
        }
    }
}

/// Packet framing over a [`Transport`]: 3-byte little-endian length, then sequence id
#[derive(Debug)]
pub struct PacketStream {
    transport: Transport,
    sequence: u8,
}

impl PacketStream {
    #[must_use]
    pub const fn new(stream: TcpStream) -> Self {
        Self {
            transport: Transport::Plain(stream),
            sequence: 0,
        }
    }

    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Hand the transport over for a TLS upgrade, keeping the sequence id
    #[must_use]
    pub fn into_parts(self) -> (Transport, u8) {
        (self.transport, self.sequence)
    }

    #[must_use]
    pub const fn from_parts(transport: Transport, sequence: u8) -> Self {
        Self {
            transport,
            sequence,
        }
    }

    /// Start a new command; the server answers with sequence id 1
    pub const fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    /// Read one packet payload
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or an out of order sequence id
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; 4];
        self.transport.read_exact(&mut header).await?;

        let [l0, l1, l2, sequence] = header;
        let len = usize::from(l0) | (usize::from(l1) << 8) | (usize::from(l2) << 16);

        if sequence != self.sequence {
            return Err(Error::Protocol(format!(
                "packet out of order: expected sequence {}, got {sequence}",
                self.sequence
            )));
        }
        self.sequence = self.sequence.wrapping_add(1);

        let mut payload = vec![0u8; len];
        self.transport.read_exact(&mut payload).await?;

        Ok(payload)
    }

    /// Write one packet payload
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or an oversized payload
    pub async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let buf = encode_packet(payload, self.sequence)?;
        self.sequence = self.sequence.wrapping_add(1);

        self.transport.write_all(&buf).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Best-effort shutdown of the underlying stream
    pub async fn shutdown(&mut self) {
        let _ = self.transport.shutdown().await;
    }
}

/// Frame a payload with its header
///
/// # Errors
///
/// Returns an error if the payload does not fit in one packet
pub fn encode_packet(payload: &[u8], sequence: u8) -> Result<BytesMut> {
    if payload.len() >= MAX_PAYLOAD_LEN {
        return Err(Error::Protocol(format!(
            "payload of {} bytes does not fit in a single packet",
            payload.len()
        )));
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Protocol("payload length overflow".to_string()))?;

    let mut buf = BytesMut::with_capacity(payload.len() + 4);
    buf.put_uint_le(u64::from(len), 3);
    buf.put_u8(sequence);
    buf.put_slice(payload);
    Ok(buf)
}

/// Read a packet straight from any stream, used by tests and tooling
///
/// # Errors
///
/// Returns an error on I/O failure
pub async fn read_raw_packet<S>(stream: &mut S) -> std::io::Result<(u8, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let [l0, l1, l2, sequence] = header;
    let len = usize::from(l0) | (usize::from(l1) << 8) | (usize::from(l2) << 16);
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok((sequence, payload))
}

/// Write a framed packet straight to any stream, used by tests and tooling
///
/// # Errors
///
/// Returns an error on I/O failure or an oversized payload
pub async fn write_raw_packet<S>(stream: &mut S, sequence: u8, payload: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let buf = encode_packet(payload, sequence)?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_encode_packet_header() {
        let buf = encode_packet(&[0x0e], 0).unwrap();
        assert_eq!(buf.as_ref(), &[1, 0, 0, 0, 0x0e]);
    }

    #[test]
    fn test_encode_packet_length_little_endian() {
        let payload = vec![0u8; 0x0102];
        let buf = encode_packet(&payload, 7).unwrap();
        assert_eq!(buf.get(..4).unwrap(), &[0x02, 0x01, 0x00, 7]);
        assert_eq!(buf.len(), 0x0102 + 4);
    }

    #[test]
    fn test_encode_packet_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN];
        assert!(matches!(
            encode_packet(&payload, 0),
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_packet_stream_sequence() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            write_raw_packet(&mut socket, 0, b"hello").await.unwrap();
            let (seq, payload) = read_raw_packet(&mut socket).await.unwrap();
            assert_eq!(seq, 1);
            assert_eq!(payload, b"world");
            write_raw_packet(&mut socket, 5, b"late").await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut packets = PacketStream::new(stream);
        assert_eq!(packets.read_packet().await.unwrap(), b"hello");
        packets.write_packet(b"world").await.unwrap();

        let err = packets.read_packet().await.unwrap_err();
        assert!(err.to_string().contains("out of order"));

        server.await.unwrap();
    }
}
