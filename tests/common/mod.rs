#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use dbprobe::{
    config::ProbeConfig,
    error::Result,
    mysql::{
        AuthPlugin,
        handshake::{
            CLIENT_CONNECT_WITH_DB, CLIENT_LONG_PASSWORD, CLIENT_PLUGIN_AUTH, CLIENT_PROTOCOL_41,
            CLIENT_SECURE_CONNECTION, CLIENT_SSL, CLIENT_TRANSACTIONS,
        },
        packet::{read_raw_packet, write_raw_packet},
    },
    resolver::{Resolve, ResolvedAddress},
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::{
    future::Future,
    io::Write,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_rustls::TlsAcceptor;

pub const USER: &str = "probe";
pub const PASSWORD: &str = "secret";
pub const DATABASE: &str = "app";
pub const SERVER_VERSION: &str = "8.0.36-mock";
pub const SCRAMBLE: &[u8; 20] = b"abcdefghij0123456789";
pub const SWITCH_SCRAMBLE: &[u8; 20] = b"ZYXWVUTSRQponmlkjihg";

/// Resolver that always answers with the same address
#[derive(Debug, Clone, Copy)]
pub struct StaticResolver(pub ResolvedAddress);

impl StaticResolver {
    pub fn localhost() -> Self {
        Self(ResolvedAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST)))
    }
}

impl Resolve for StaticResolver {
    fn resolve(&self, _host: &str) -> impl Future<Output = Result<ResolvedAddress>> + Send {
        let addr = self.0;
        async move { Ok(addr) }
    }
}

/// Self-signed certificate for `name`, written to a PEM file usable as `--ssl-ca`
pub struct TestCert {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
    pub ca_file: tempfile::NamedTempFile,
}

impl TestCert {
    pub fn new(name: &str) -> Self {
        let certified = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();

        let mut ca_file = tempfile::NamedTempFile::new().unwrap();
        ca_file
            .write_all(certified.cert.pem().as_bytes())
            .unwrap();

        Self {
            cert: certified.cert.der().clone(),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                certified.signing_key.serialize_der(),
            )),
            ca_file,
        }
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        dbprobe::tls::ensure_crypto_provider();
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![self.cert.clone()], self.key.clone_key())
            .unwrap();
        TlsAcceptor::from(Arc::new(config))
    }
}

/// How the mock server behaves for its single connection
#[derive(Clone)]
pub struct MockBehavior {
    pub password: String,
    pub auth_plugin: AuthPlugin,
    /// Send an auth switch to this plugin after the handshake response
    pub switch_to: Option<AuthPlugin>,
    /// `caching_sha2_password` asks for the cleartext password
    pub full_auth: bool,
    pub tls: Option<TlsAcceptor>,
    /// Accept the socket and never say a word
    pub silent: bool,
    /// Answer the greeting with this ERR packet instead of a handshake
    pub greeting_error: Option<(u16, &'static str)>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            password: PASSWORD.to_string(),
            auth_plugin: AuthPlugin::NativePassword,
            switch_to: None,
            full_auth: false,
            tls: None,
            silent: false,
            greeting_error: None,
        }
    }
}

/// What the mock server observed
#[derive(Debug, Default, Clone)]
pub struct Observed {
    pub tls: bool,
    pub user: String,
    pub database: String,
    pub authenticated: bool,
    pub pinged: bool,
    pub quit: bool,
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub handle: JoinHandle<Observed>,
}

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Start a server that handles exactly one connection
pub async fn start_mock(behavior: MockBehavior) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        serve(socket, behavior).await
    });

    MockServer { addr, handle }
}

/// A port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub fn config(port: u16) -> dbprobe::config::ProbeConfigBuilder {
    ProbeConfig::builder()
        .host("db.example.com")
        .port(port)
        .user(USER)
        .password(PASSWORD)
        .database(DATABASE)
        .connect_timeout(Duration::from_secs(5))
}

async fn serve(mut socket: TcpStream, behavior: MockBehavior) -> Observed {
    let observed = Observed::default();

    if behavior.silent {
        // hold the socket open until the client gives up
        let mut buf = [0u8; 1];
        let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
        return observed;
    }

    if let Some((code, message)) = behavior.greeting_error {
        // errors before the handshake carry no SQL state
        let mut packet = vec![0xff];
        packet.extend_from_slice(&code.to_le_bytes());
        packet.extend_from_slice(message.as_bytes());
        write_raw_packet(&mut socket, 0, &packet).await.unwrap();
        return observed;
    }

    let mut capabilities = CLIENT_LONG_PASSWORD
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_PLUGIN_AUTH;
    if behavior.tls.is_some() {
        capabilities |= CLIENT_SSL;
    }

    write_raw_packet(
        &mut socket,
        0,
        &greeting(capabilities, behavior.auth_plugin.name()),
    )
    .await
    .unwrap();

    let Ok((seq, payload)) = read_raw_packet(&mut socket).await else {
        return observed;
    };

    // SSLRequest is a bare 32-byte capability block
    if payload.len() == 32 {
        let acceptor = behavior.tls.clone().expect("client asked for TLS");
        let Ok(tls) = acceptor.accept(socket).await else {
            return observed;
        };

        let mut stream: Box<dyn Io> = Box::new(tls);
        let Ok((seq, payload)) = read_raw_packet(&mut stream).await else {
            return observed;
        };

        let observed = Observed {
            tls: true,
            ..observed
        };
        return authenticate(stream, seq, &payload, &behavior, observed).await;
    }

    authenticate(Box::new(socket), seq, &payload, &behavior, observed).await
}

async fn authenticate(
    mut stream: Box<dyn Io>,
    mut seq: u8,
    payload: &[u8],
    behavior: &MockBehavior,
    mut observed: Observed,
) -> Observed {
    let response = parse_handshake_response(payload);
    observed.user.clone_from(&response.user);
    observed.database.clone_from(&response.database);

    let mut plugin = behavior.auth_plugin;
    let mut scramble: &[u8] = SCRAMBLE;
    let mut token = response.auth;

    if let Some(target) = behavior.switch_to {
        let mut switch = vec![0xfe];
        switch.extend_from_slice(target.name().as_bytes());
        switch.push(0);
        switch.extend_from_slice(SWITCH_SCRAMBLE);
        switch.push(0);
        seq = seq.wrapping_add(1);
        write_raw_packet(&mut stream, seq, &switch).await.unwrap();

        let Ok((next_seq, next_token)) = read_raw_packet(&mut stream).await else {
            return observed;
        };
        seq = next_seq;
        token = next_token;
        plugin = target;
        scramble = SWITCH_SCRAMBLE;
    }

    let mut accepted = token == plugin.auth_response(&behavior.password, scramble);

    if accepted && plugin == AuthPlugin::CachingSha2Password {
        seq = seq.wrapping_add(1);
        if behavior.full_auth {
            write_raw_packet(&mut stream, seq, &[0x01, 0x04]).await.unwrap();
            let Ok((next_seq, cleartext)) = read_raw_packet(&mut stream).await else {
                return observed;
            };
            seq = next_seq;
            let mut expected = behavior.password.as_bytes().to_vec();
            expected.push(0);
            accepted = cleartext == expected;
        } else {
            write_raw_packet(&mut stream, seq, &[0x01, 0x03]).await.unwrap();
        }
    }

    seq = seq.wrapping_add(1);
    if !accepted || response.user != USER {
        let message = format!(
            "Access denied for user '{}'@'127.0.0.1' (using password: YES)",
            response.user
        );
        write_raw_packet(&mut stream, seq, &err_packet(1045, "28000", &message))
            .await
            .unwrap();
        return observed;
    }

    write_raw_packet(&mut stream, seq, &ok_packet()).await.unwrap();
    observed.authenticated = true;

    while let Ok((seq, command)) = read_raw_packet(&mut stream).await {
        match command.first() {
            Some(0x0e) => {
                observed.pinged = true;
                write_raw_packet(&mut stream, seq.wrapping_add(1), &ok_packet())
                    .await
                    .unwrap();
            }
            Some(0x01) => {
                observed.quit = true;
                break;
            }
            _ => break,
        }
    }

    observed
}

fn greeting(capabilities: u32, plugin: &str) -> Vec<u8> {
    let caps = capabilities.to_le_bytes();
    let mut p = vec![0x0a];
    p.extend_from_slice(SERVER_VERSION.as_bytes());
    p.push(0);
    p.extend_from_slice(&42u32.to_le_bytes());
    p.extend_from_slice(&SCRAMBLE[..8]);
    p.push(0);
    p.extend_from_slice(&caps[..2]);
    p.push(45);
    p.extend_from_slice(&2u16.to_le_bytes());
    p.extend_from_slice(&caps[2..]);
    p.push(21);
    p.extend_from_slice(&[0u8; 10]);
    p.extend_from_slice(&SCRAMBLE[8..]);
    p.push(0);
    p.extend_from_slice(plugin.as_bytes());
    p.push(0);
    p
}

fn ok_packet() -> Vec<u8> {
    vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]
}

fn err_packet(code: u16, state: &str, message: &str) -> Vec<u8> {
    let mut p = vec![0xff];
    p.extend_from_slice(&code.to_le_bytes());
    p.push(b'#');
    p.extend_from_slice(state.as_bytes());
    p.extend_from_slice(message.as_bytes());
    p
}

struct HandshakeResponse {
    user: String,
    auth: Vec<u8>,
    database: String,
}

fn parse_handshake_response(payload: &[u8]) -> HandshakeResponse {
    // capabilities(4) max packet(4) charset(1) filler(23)
    let mut rest = &payload[32..];

    let nul = rest.iter().position(|b| *b == 0).unwrap();
    let user = String::from_utf8(rest[..nul].to_vec()).unwrap();
    rest = &rest[nul + 1..];

    let len = usize::from(rest[0]);
    let auth = rest[1..=len].to_vec();
    rest = &rest[len + 1..];

    let nul = rest.iter().position(|b| *b == 0).unwrap();
    let database = String::from_utf8(rest[..nul].to_vec()).unwrap();

    HandshakeResponse {
        user,
        auth,
        database,
    }
}
