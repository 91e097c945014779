use super::{Error, Result};
use bytes::{BufMut, BytesMut};

// capability flags
pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
pub const CLIENT_SSL: u32 = 0x0000_0800;
pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;

// packet headers
pub const OK_HEADER: u8 = 0x00;
pub const AUTH_MORE_DATA_HEADER: u8 = 0x01;
pub const AUTH_SWITCH_HEADER: u8 = 0xfe;
pub const ERR_HEADER: u8 = 0xff;

const PROTOCOL_VERSION: u8 = 10;
const MAX_PACKET_SIZE: u32 = 16_777_216;
/// `utf8mb4_general_ci`
const DEFAULT_COLLATION: u8 = 45;

/// Initial handshake sent by the server (protocol version 10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub server_version: String,
    pub connection_id: u32,
    pub capabilities: u32,
    pub charset: u8,
    pub scramble: Vec<u8>,
    pub auth_plugin: Option<String>,
}

impl Handshake {
    /// Parse the initial handshake payload
    ///
    /// # Errors
    ///
    /// Returns the server error if the server refused us outright, a protocol
    /// error if the payload is malformed
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let Some((&protocol, rest)) = payload.split_first() else {
            return Err(Error::Protocol("empty handshake payload".to_string()));
        };

        if protocol == ERR_HEADER {
            return Err(parse_err_packet(payload, false));
        }
        if protocol != PROTOCOL_VERSION {
            return Err(Error::Protocol(format!(
                "unsupported handshake protocol version {protocol}"
            )));
        }

        let mut reader = Reader::new(rest);
        let server_version = reader.null_terminated("server version")?;
        let connection_id = reader.u32_le("connection id")?;
        let mut scramble = reader.take(8, "auth plugin data")?.to_vec();
        reader.skip(1, "filler")?;
        let mut capabilities = u32::from(reader.u16_le("capability flags")?);

        let mut charset = 0;
        let mut auth_plugin = None;

        if !reader.is_empty() {
            charset = reader.u8("character set")?;
            reader.skip(2, "status flags")?;
            capabilities |= u32::from(reader.u16_le("upper capability flags")?) << 16;
            let auth_data_len = reader.u8("auth plugin data length")?;
            reader.skip(10, "reserved")?;

            if capabilities & CLIENT_SECURE_CONNECTION != 0 {
                let len = usize::from(auth_data_len).saturating_sub(8).max(13);
                let part2 = reader.take_up_to(len);
                // trailing NUL is not part of the scramble
                let part2 = part2.strip_suffix(&[0]).unwrap_or(part2);
                scramble.extend_from_slice(part2);
            }

            if capabilities & CLIENT_PLUGIN_AUTH != 0 {
                let name = reader.rest_until_null();
                if !name.is_empty() {
                    auth_plugin = Some(String::from_utf8_lossy(name).into_owned());
                }
            }
        }

        Ok(Self {
            server_version,
            connection_id,
            capabilities,
            charset,
            scramble,
            auth_plugin,
        })
    }

    #[must_use]
    pub const fn supports(&self, flag: u32) -> bool {
        self.capabilities & flag != 0
    }
}

/// Capability flags we send, masked by what the server offers
#[must_use]
pub const fn client_capabilities(server: u32, tls: bool) -> u32 {
    let mut flags = CLIENT_LONG_PASSWORD
        | CLIENT_LONG_FLAG
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_PLUGIN_AUTH;
    if tls {
        flags |= CLIENT_SSL;
    }
    flags & (server | CLIENT_PROTOCOL_41)
}

/// `SSLRequest`, the truncated handshake response that asks for TLS
#[must_use]
pub fn ssl_request(capabilities: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(32);
    put_response_prefix(&mut buf, capabilities | CLIENT_SSL);
    buf
}

/// `HandshakeResponse41`
///
/// # Errors
///
/// Returns a protocol error if the auth response is longer than 255 bytes
pub fn handshake_response(
    capabilities: u32,
    user: &str,
    auth_response: &[u8],
    database: &str,
    auth_plugin: &str,
) -> Result<BytesMut> {
    let auth_len = u8::try_from(auth_response.len())
        .map_err(|_| Error::Protocol("auth response too long".to_string()))?;

    let mut buf = BytesMut::with_capacity(64 + user.len() + database.len());
    put_response_prefix(&mut buf, capabilities);

    buf.put_slice(user.as_bytes());
    buf.put_u8(0);

    buf.put_u8(auth_len);
    buf.put_slice(auth_response);

    if capabilities & CLIENT_CONNECT_WITH_DB != 0 {
        buf.put_slice(database.as_bytes());
        buf.put_u8(0);
    }

    if capabilities & CLIENT_PLUGIN_AUTH != 0 {
        buf.put_slice(auth_plugin.as_bytes());
        buf.put_u8(0);
    }

    Ok(buf)
}

fn put_response_prefix(buf: &mut BytesMut, capabilities: u32) {
    buf.put_u32_le(capabilities);
    buf.put_u32_le(MAX_PACKET_SIZE);
    buf.put_u8(DEFAULT_COLLATION);
    buf.put_bytes(0, 23);
}

/// Turn an ERR packet into [`Error::Server`]
#[must_use]
pub fn parse_err_packet(payload: &[u8], protocol_41: bool) -> Error {
    let mut reader = Reader::new(payload.get(1..).unwrap_or_default());
    let Ok(code) = reader.u16_le("error code") else {
        return Error::Protocol("truncated error packet".to_string());
    };

    let mut rest = reader.remaining();
    let mut state = None;
    if protocol_41
        && let Some((b'#', tail)) = rest.split_first()
        && let (Some(sql_state), Some(message)) = (tail.get(..5), tail.get(5..))
    {
        state = Some(String::from_utf8_lossy(sql_state).into_owned());
        rest = message;
    }

    Error::Server {
        code,
        state,
        message: String::from_utf8_lossy(rest).into_owned(),
    }
}

/// `AuthSwitchRequest`: plugin name and fresh scramble
///
/// # Errors
///
/// Returns a protocol error if the plugin name is missing
pub fn parse_auth_switch(payload: &[u8]) -> Result<(String, Vec<u8>)> {
    let mut reader = Reader::new(payload.get(1..).unwrap_or_default());
    let plugin = reader.null_terminated("auth switch plugin name")?;
    let data = reader.remaining();
    let data = data.strip_suffix(&[0]).unwrap_or(data);
    Ok((plugin, data.to_vec()))
}

/// Bounds-checked cursor over a payload
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    const fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    const fn remaining(&self) -> &'a [u8] {
        self.buf
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::Protocol(format!(
                "unexpectedly short handshake: missing {what}"
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_up_to(&mut self, n: usize) -> &'a [u8] {
        let (head, tail) = self.buf.split_at(n.min(self.buf.len()));
        self.buf = tail;
        head
    }

    fn skip(&mut self, n: usize, what: &str) -> Result<()> {
        self.take(n, what).map(|_| ())
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        let bytes = self.take(1, what)?;
        Ok(bytes.first().copied().unwrap_or_default())
    }

    fn u16_le(&mut self, what: &str) -> Result<u16> {
        let bytes = self.take(2, what)?;
        let array: [u8; 2] = bytes
            .try_into()
            .map_err(|_| Error::Protocol(format!("invalid {what}")))?;
        Ok(u16::from_le_bytes(array))
    }

    fn u32_le(&mut self, what: &str) -> Result<u32> {
        let bytes = self.take(4, what)?;
        let array: [u8; 4] = bytes
            .try_into()
            .map_err(|_| Error::Protocol(format!("invalid {what}")))?;
        Ok(u32::from_le_bytes(array))
    }

    fn null_terminated(&mut self, what: &str) -> Result<String> {
        let end = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Protocol(format!("missing terminator for {what}")))?;
        let value = String::from_utf8_lossy(self.take(end, what)?).into_owned();
        self.skip(1, what)?;
        Ok(value)
    }

    /// Up to the first NUL or the end, whichever comes first
    fn rest_until_null(&mut self) -> &'a [u8] {
        let end = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.buf.len());
        self.take_up_to(end)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn handshake_payload(plugin: &str, capabilities: u32) -> Vec<u8> {
        let mut payload = vec![10u8];
        payload.extend_from_slice(b"8.0.36\0");
        payload.extend_from_slice(&42u32.to_le_bytes());
        payload.extend_from_slice(b"abcdefgh");
        payload.push(0);
        payload.extend_from_slice(&((capabilities & 0xffff) as u16).to_le_bytes());
        payload.push(45);
        payload.extend_from_slice(&2u16.to_le_bytes());
        payload.extend_from_slice(&((capabilities >> 16) as u16).to_le_bytes());
        payload.push(21);
        payload.extend_from_slice(&[0u8; 10]);
        payload.extend_from_slice(b"ijklmnopqrst\0");
        payload.extend_from_slice(plugin.as_bytes());
        payload.push(0);
        payload
    }

    const SERVER_CAPS: u32 = CLIENT_LONG_PASSWORD
        | CLIENT_PROTOCOL_41
        | CLIENT_SSL
        | CLIENT_SECURE_CONNECTION
        | CLIENT_PLUGIN_AUTH
        | CLIENT_CONNECT_WITH_DB;

    #[test]
    fn test_parse_handshake_full() {
        let payload = handshake_payload("caching_sha2_password", SERVER_CAPS);
        let handshake = Handshake::parse(&payload).unwrap();
        assert_eq!(handshake.server_version, "8.0.36");
        assert_eq!(handshake.connection_id, 42);
        assert_eq!(handshake.charset, 45);
        assert_eq!(handshake.scramble, b"abcdefghijklmnopqrst");
        assert_eq!(handshake.auth_plugin.as_deref(), Some("caching_sha2_password"));
        assert!(handshake.supports(CLIENT_SSL));
        assert!(handshake.supports(CLIENT_PLUGIN_AUTH));
    }

    #[test]
    fn test_parse_handshake_without_ssl() {
        let payload = handshake_payload("mysql_native_password", SERVER_CAPS & !CLIENT_SSL);
        let handshake = Handshake::parse(&payload).unwrap();
        assert!(!handshake.supports(CLIENT_SSL));
    }

    #[test]
    fn test_parse_handshake_minimal() {
        let mut payload = vec![10u8];
        payload.extend_from_slice(b"5.0.0\0");
        payload.extend_from_slice(&[0u8; 4]);
        payload.extend_from_slice(&[1u8; 8]);
        payload.push(0);
        payload.extend_from_slice(&(CLIENT_SSL as u16).to_le_bytes());

        let handshake = Handshake::parse(&payload).unwrap();
        assert!(handshake.supports(CLIENT_SSL));
        assert_eq!(handshake.scramble.len(), 8);
        assert!(handshake.auth_plugin.is_none());
    }

    #[test]
    fn test_parse_handshake_empty() {
        let err = Handshake::parse(&[]).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_parse_handshake_too_short() {
        assert!(Handshake::parse(&[10u8]).is_err());
        assert!(Handshake::parse(b"\x0a5.7.0\0\x01\x02").is_err());
    }

    #[test]
    fn test_parse_handshake_bad_protocol() {
        let err = Handshake::parse(&[9u8, 0]).unwrap_err();
        assert!(err.to_string().contains("protocol version 9"));
    }

    #[test]
    fn test_parse_handshake_error_packet() {
        let mut payload = vec![ERR_HEADER];
        payload.extend_from_slice(&1129u16.to_le_bytes());
        payload.extend_from_slice(b"Host '10.0.0.1' is blocked");
        let err = Handshake::parse(&payload).unwrap_err();
        assert_eq!(err.to_string(), "Error 1129: Host '10.0.0.1' is blocked");
    }

    #[test]
    fn test_parse_err_packet_with_state() {
        let mut payload = vec![ERR_HEADER];
        payload.extend_from_slice(&1045u16.to_le_bytes());
        payload.extend_from_slice(b"#28000Access denied for user 'probe'@'localhost'");
        match parse_err_packet(&payload, true) {
            Error::Server {
                code,
                state,
                message,
            } => {
                assert_eq!(code, 1045);
                assert_eq!(state.as_deref(), Some("28000"));
                assert_eq!(message, "Access denied for user 'probe'@'localhost'");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_err_packet_truncated() {
        assert!(matches!(
            parse_err_packet(&[ERR_HEADER, 1], true),
            Error::Protocol(_)
        ));
    }

    #[test]
    fn test_parse_auth_switch() {
        let mut payload = vec![AUTH_SWITCH_HEADER];
        payload.extend_from_slice(b"mysql_native_password\0");
        payload.extend_from_slice(b"01234567890123456789\0");
        let (plugin, data) = parse_auth_switch(&payload).unwrap();
        assert_eq!(plugin, "mysql_native_password");
        assert_eq!(data, b"01234567890123456789");
    }

    #[test]
    fn test_client_capabilities_masked_by_server() {
        let flags = client_capabilities(CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION, true);
        assert_eq!(flags, CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION);

        let flags = client_capabilities(SERVER_CAPS, true);
        assert!(flags & CLIENT_SSL != 0);
        let flags = client_capabilities(SERVER_CAPS, false);
        assert!(flags & CLIENT_SSL == 0);
    }

    #[test]
    fn test_ssl_request_layout() {
        let buf = ssl_request(CLIENT_PROTOCOL_41);
        assert_eq!(buf.len(), 32);
        let flags = u32::from_le_bytes(buf.get(..4).unwrap().try_into().unwrap());
        assert!(flags & CLIENT_SSL != 0);
        assert_eq!(buf.get(8), Some(&DEFAULT_COLLATION));
    }

    #[test]
    fn test_handshake_response_layout() {
        let caps = client_capabilities(SERVER_CAPS, false);
        let buf = handshake_response(caps, "probe", &[1, 2, 3], "app", "mysql_native_password")
            .unwrap();
        let body = buf.get(32..).unwrap();
        assert_eq!(body, b"probe\0\x03\x01\x02\x03app\0mysql_native_password\0");
    }

    #[test]
    fn test_handshake_response_without_db_capability() {
        let caps = client_capabilities(CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION, false);
        let buf = handshake_response(caps, "probe", &[], "app", "mysql_native_password").unwrap();
        assert_eq!(buf.get(32..).unwrap(), b"probe\0\x00");
    }

    #[test]
    fn test_handshake_response_auth_too_long() {
        let long = vec![0u8; 300];
        assert!(handshake_response(SERVER_CAPS, "u", &long, "db", "p").is_err());
    }
}
