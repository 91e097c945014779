use super::{
    Error, Result,
    auth::{
        AuthPlugin, FAST_AUTH_SUCCESS, PERFORM_FULL_AUTHENTICATION, cleartext_password,
    },
    handshake::{
        AUTH_MORE_DATA_HEADER, AUTH_SWITCH_HEADER, CLIENT_PROTOCOL_41, CLIENT_SSL, ERR_HEADER,
        Handshake, OK_HEADER, client_capabilities, handshake_response, parse_auth_switch,
        parse_err_packet, ssl_request,
    },
    packet::{PacketStream, Transport},
};
use crate::{
    probe::ConnectionDescriptor,
    tls::{TlsMetadata, build_connector, session_metadata},
};
use tokio::net::TcpStream;
use tracing::debug;

const COM_QUIT: u8 = 0x01;
const COM_PING: u8 = 0x0e;

/// Auth switch and more-data exchanges allowed before giving up
const MAX_AUTH_ROUNDS: usize = 8;

/// An authenticated connection, closed when dropped
#[derive(Debug)]
pub struct MySqlConnection {
    packets: PacketStream,
    handshake: Handshake,
    tls: Option<TlsMetadata>,
}

impl MySqlConnection {
    /// Dial the descriptor's resolved address and log in
    ///
    /// With a TLS policy the connection is upgraded right after the server
    /// greeting and the certificate is checked against the policy's server
    /// name, not the dialed address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket, the TLS handshake or authentication fails
    pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let tls = descriptor
            .tls()
            .map(|policy| build_connector(policy).map_err(|e| Error::TlsSetup(e.to_string())))
            .transpose()?;

        let addr = descriptor.socket_addr();
        debug!(%addr, "dialing");
        let stream = TcpStream::connect(addr).await?;
        let mut packets = PacketStream::new(stream);

        let greeting = packets.read_packet().await?;
        let handshake = Handshake::parse(&greeting)?;
        debug!(
            server_version = %handshake.server_version,
            connection_id = handshake.connection_id,
            auth_plugin = ?handshake.auth_plugin,
            "received server greeting"
        );

        if !handshake.supports(CLIENT_PROTOCOL_41) {
            return Err(Error::Protocol(
                "server does not speak protocol 4.1".to_string(),
            ));
        }

        let capabilities = client_capabilities(handshake.capabilities, tls.is_some());

        let mut tls_metadata = None;
        if let Some((connector, server_name, verifier)) = tls {
            if !handshake.supports(CLIENT_SSL) {
                return Err(Error::TlsUnsupported);
            }

            packets.write_packet(&ssl_request(capabilities)).await?;

            let (transport, sequence) = packets.into_parts();
            let Transport::Plain(stream) = transport else {
                return Err(Error::Protocol("transport is already encrypted".to_string()));
            };

            debug!(server_name = ?server_name, "starting TLS handshake");
            let stream = connector
                .connect(server_name, stream)
                .await
                .map_err(Error::Tls)?;

            let metadata = session_metadata(stream.get_ref().1, &verifier);
            debug!(version = ?metadata.version, cipher = ?metadata.cipher, "TLS established");
            tls_metadata = Some(metadata);

            packets = PacketStream::from_parts(Transport::Tls(stream), sequence);
        }

        let plugin = handshake
            .auth_plugin
            .as_deref()
            .and_then(|name| name.parse::<AuthPlugin>().ok())
            .unwrap_or(AuthPlugin::NativePassword);

        let auth_response = plugin.auth_response(descriptor.password(), &handshake.scramble);
        let response = handshake_response(
            capabilities,
            descriptor.user(),
            &auth_response,
            descriptor.database(),
            plugin.name(),
        )?;
        packets.write_packet(&response).await?;

        let mut conn = Self {
            packets,
            handshake,
            tls: tls_metadata,
        };
        conn.authenticate(plugin, descriptor.password()).await?;

        debug!("authenticated");
        Ok(conn)
    }

    async fn authenticate(&mut self, mut plugin: AuthPlugin, password: &str) -> Result<()> {
        for _ in 0..MAX_AUTH_ROUNDS {
            let payload = self.packets.read_packet().await?;

            match payload.first().copied() {
                Some(OK_HEADER) => return Ok(()),
                Some(ERR_HEADER) => return Err(parse_err_packet(&payload, true)),
                Some(AUTH_SWITCH_HEADER) => {
                    let (name, scramble) = parse_auth_switch(&payload)?;
                    plugin = name.parse()?;
                    debug!(%plugin, "server requested auth switch");
                    self.packets
                        .write_packet(&plugin.auth_response(password, &scramble))
                        .await?;
                }
                Some(AUTH_MORE_DATA_HEADER) if plugin == AuthPlugin::CachingSha2Password => {
                    match payload.get(1).copied() {
                        // OK packet follows
                        Some(FAST_AUTH_SUCCESS) => {}
                        Some(PERFORM_FULL_AUTHENTICATION) => {
                            if !self.is_tls() {
                                return Err(Error::Auth(
                                    "caching_sha2_password full authentication requires TLS"
                                        .to_string(),
                                ));
                            }
                            self.packets
                                .write_packet(&cleartext_password(password))
                                .await?;
                        }
                        other => {
                            return Err(Error::Protocol(format!(
                                "unexpected caching_sha2_password status {other:?}"
                            )));
                        }
                    }
                }
                Some(other) => {
                    return Err(Error::Protocol(format!(
                        "unexpected packet 0x{other:02x} during authentication"
                    )));
                }
                None => {
                    return Err(Error::Protocol(
                        "empty packet during authentication".to_string(),
                    ));
                }
            }
        }

        Err(Error::Auth("authentication did not complete".to_string()))
    }

    /// Liveness check: `COM_PING` must come back with an OK packet
    ///
    /// # Errors
    ///
    /// Returns an error if the server answers with anything but OK
    pub async fn ping(&mut self) -> Result<()> {
        self.packets.reset_sequence();
        self.packets.write_packet(&[COM_PING]).await?;

        let payload = self.packets.read_packet().await?;
        match payload.first().copied() {
            Some(OK_HEADER) => Ok(()),
            Some(ERR_HEADER) => Err(parse_err_packet(&payload, true)),
            _ => Err(Error::Protocol("unexpected reply to COM_PING".to_string())),
        }
    }

    /// Say goodbye and shut the socket down; errors are ignored
    pub async fn close(mut self) {
        self.packets.reset_sequence();
        if let Err(e) = self.packets.write_packet(&[COM_QUIT]).await {
            debug!("COM_QUIT failed: {e}");
        }
        self.packets.shutdown().await;
    }

    #[must_use]
    pub fn server_version(&self) -> &str {
        &self.handshake.server_version
    }

    #[must_use]
    pub const fn connection_id(&self) -> u32 {
        self.handshake.connection_id
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.packets.transport(), Transport::Tls(_))
    }

    #[must_use]
    pub const fn tls_metadata(&self) -> Option<&TlsMetadata> {
        self.tls.as_ref()
    }
}
