//! SOCKS5 handshake state machine.
//!
//! Drives one client connection through the greeting, username/password
//! sub-negotiation (RFC 1929), and the CONNECT request, then dials the
//! target. States advance strictly in order and every state reads exactly
//! the byte count the protocol prescribes; a short or failed read aborts
//! the session with no reply.
//!
//! Deliberate policy: an unsupported command or unrecognized address type
//! closes the transport without the protocol's dedicated reply codes. An
//! unknown ATYP leaves the target unset, so the dial fails fast and the
//! client sees the ordinary general-failure reply.

use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::server::Credentials;

/// SOCKS protocol version.
pub const SOCKS_VERSION: u8 = 0x05;
/// Username/password authentication method identifier.
pub const METHOD_USERPASS: u8 = 0x02;
/// Username/password sub-negotiation version.
pub const AUTH_VERSION: u8 = 0x01;
/// Sub-negotiation status: success.
pub const AUTH_SUCCESS: u8 = 0x00;
/// Sub-negotiation status: failure.
pub const AUTH_FAILURE: u8 = 0x01;
/// CONNECT command.
pub const CMD_CONNECT: u8 = 0x01;
/// Address type: IPv4, 4 octets.
pub const ATYP_IPV4: u8 = 0x01;
/// Address type: domain name, 1-byte length prefix.
pub const ATYP_DOMAIN: u8 = 0x03;
/// Address type: IPv6, 16 octets.
pub const ATYP_IPV6: u8 = 0x04;
/// Reply code: request granted.
pub const REP_SUCCESS: u8 = 0x00;
/// Reply code: general server failure.
pub const REP_GENERAL_FAILURE: u8 = 0x05;

/// Destination address as encoded in a CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// Dotted IPv4 address.
    Ipv4(Ipv4Addr),
    /// Hostname, resolved at dial time.
    Domain(String),
    /// IPv6 address.
    Ipv6(Ipv6Addr),
    /// Unrecognized ATYP. No address bytes were read; dialing this target
    /// fails immediately.
    Unknown,
}

/// Parsed CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Requested destination host.
    pub target: TargetAddr,
    /// Requested destination port.
    pub port: u16,
}

impl ConnectRequest {
    /// The `host:port` string handed to the dialer.
    ///
    /// [`TargetAddr::Unknown`] yields a hostless string that no resolver
    /// accepts, which is what makes the doomed-dial path fail fast.
    pub fn endpoint(&self) -> String {
        match &self.target {
            TargetAddr::Ipv4(ip) => format!("{}:{}", ip, self.port),
            TargetAddr::Domain(host) => format!("{}:{}", host, self.port),
            TargetAddr::Ipv6(ip) => format!("[{}]:{}", ip, self.port),
            TargetAddr::Unknown => format!(":{}", self.port),
        }
    }
}

/// Handshake states, entered strictly in sequence.
#[derive(Debug)]
enum HandshakeState {
    /// Read the method list, force username/password.
    Greeting,
    /// Read and verify the credential pair.
    Authenticate,
    /// Read the CONNECT request and parse the target address.
    Request,
    /// Open the outbound connection and send the reply.
    Dial(ConnectRequest),
}

/// A completed handshake: the parsed request plus the dialed destination
/// transport. Control passes to the relay from here.
#[derive(Debug)]
pub struct Established {
    /// The request the tunnel was opened for.
    pub request: ConnectRequest,
    /// Destination transport.
    pub upstream: TcpStream,
}

/// Drives the handshake for a single session.
///
/// Generic over the client transport so the protocol steps can be
/// exercised against in-memory streams. The scratch buffer is borrowed
/// from the session's pool and reused across every step.
pub struct Handshake<'a, S> {
    stream: &'a mut S,
    buf: &'a mut [u8],
    credentials: &'a Credentials,
}

impl<'a, S> Handshake<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a handshake over `stream` using `buf` as read scratch.
    pub fn new(stream: &'a mut S, buf: &'a mut [u8], credentials: &'a Credentials) -> Self {
        Self {
            stream,
            buf,
            credentials,
        }
    }

    /// Run the state machine to completion.
    ///
    /// The caller bounds this future with the handshake deadline; once it
    /// returns, no time limit applies to the transport.
    pub async fn run(mut self) -> Result<Established> {
        let mut state = HandshakeState::Greeting;

        loop {
            state = match state {
                HandshakeState::Greeting => {
                    self.greeting().await?;
                    HandshakeState::Authenticate
                }
                HandshakeState::Authenticate => {
                    self.authenticate().await?;
                    HandshakeState::Request
                }
                HandshakeState::Request => HandshakeState::Dial(self.read_request().await?),
                HandshakeState::Dial(request) => {
                    let upstream = self.dial(&request).await?;
                    return Ok(Established { request, upstream });
                }
            };
        }
    }

    /// Greeting: `[VER, NMETHODS, METHODS...]`.
    ///
    /// The offered methods are discarded, username/password is the only
    /// method this server serves.
    async fn greeting(&mut self) -> Result<()> {
        self.stream.read_exact(&mut self.buf[..2]).await?;
        let nmethods = self.buf[1] as usize;
        self.stream.read_exact(&mut self.buf[..nmethods]).await?;

        self.stream
            .write_all(&[SOCKS_VERSION, METHOD_USERPASS])
            .await?;
        Ok(())
    }

    /// Username/password sub-negotiation: `[VER, ULEN, UNAME, PLEN, PASSWD]`.
    ///
    /// Both fields are compared by exact byte equality. On mismatch the
    /// failure status is sent and nothing further is read or written.
    async fn authenticate(&mut self) -> Result<()> {
        self.stream.read_exact(&mut self.buf[..2]).await?;
        let ulen = self.buf[1] as usize;
        self.stream.read_exact(&mut self.buf[..ulen]).await?;
        // The password read below reuses the buffer, so compare now.
        let user_ok = self.credentials.username_matches(&self.buf[..ulen]);

        self.stream.read_exact(&mut self.buf[..1]).await?;
        let plen = self.buf[0] as usize;
        self.stream.read_exact(&mut self.buf[..plen]).await?;
        let pass_ok = self.credentials.password_matches(&self.buf[..plen]);

        if !(user_ok && pass_ok) {
            self.stream.write_all(&[AUTH_VERSION, AUTH_FAILURE]).await?;
            return Err(Error::Authentication);
        }

        self.stream.write_all(&[AUTH_VERSION, AUTH_SUCCESS]).await?;
        Ok(())
    }

    /// Request: `[VER, CMD, RSV, ATYP, DST.ADDR, DST.PORT]`.
    async fn read_request(&mut self) -> Result<ConnectRequest> {
        self.stream.read_exact(&mut self.buf[..4]).await?;

        let cmd = self.buf[1];
        if cmd != CMD_CONNECT {
            // Silent close, no reply bytes after the request header.
            return Err(Error::UnsupportedCommand(cmd));
        }

        let target = match self.buf[3] {
            ATYP_IPV4 => {
                self.stream.read_exact(&mut self.buf[..4]).await?;
                TargetAddr::Ipv4(Ipv4Addr::new(
                    self.buf[0],
                    self.buf[1],
                    self.buf[2],
                    self.buf[3],
                ))
            }
            ATYP_DOMAIN => {
                self.stream.read_exact(&mut self.buf[..1]).await?;
                let dlen = self.buf[0] as usize;
                self.stream.read_exact(&mut self.buf[..dlen]).await?;
                TargetAddr::Domain(String::from_utf8_lossy(&self.buf[..dlen]).into_owned())
            }
            ATYP_IPV6 => {
                self.stream.read_exact(&mut self.buf[..16]).await?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.buf[..16]);
                TargetAddr::Ipv6(Ipv6Addr::from(octets))
            }
            atyp => {
                tracing::debug!("unrecognized address type {:#04x}", atyp);
                TargetAddr::Unknown
            }
        };

        self.stream.read_exact(&mut self.buf[..2]).await?;
        let port = u16::from_be_bytes([self.buf[0], self.buf[1]]);

        Ok(ConnectRequest { target, port })
    }

    /// Dial the requested target and report the outcome on the wire.
    async fn dial(&mut self, request: &ConnectRequest) -> Result<TcpStream> {
        match TcpStream::connect(request.endpoint()).await {
            Ok(upstream) => {
                self.send_reply(REP_SUCCESS).await?;
                Ok(upstream)
            }
            Err(e) => {
                self.send_reply(REP_GENERAL_FAILURE).await?;
                Err(Error::Dial(e))
            }
        }
    }

    /// Reply with a fixed all-zero bind address, which CONNECT clients
    /// ignore.
    async fn send_reply(&mut self, code: u8) -> Result<()> {
        self.stream
            .write_all(&[SOCKS_VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn test_credentials() -> Credentials {
        Credentials {
            username: "admin".into(),
            password: "admin".into(),
        }
    }

    fn auth_bytes(user: &[u8], pass: &[u8]) -> Vec<u8> {
        let mut bytes = vec![AUTH_VERSION, user.len() as u8];
        bytes.extend_from_slice(user);
        bytes.push(pass.len() as u8);
        bytes.extend_from_slice(pass);
        bytes
    }

    #[tokio::test]
    async fn test_greeting_forces_userpass() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        // Client offers no-auth and user/pass
        client.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();

        let mut hs = Handshake::new(&mut server, &mut buf, &creds);
        hs.greeting().await.unwrap();

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x02]);
    }

    #[tokio::test]
    async fn test_greeting_with_zero_methods() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        client.write_all(&[0x05, 0x00]).await.unwrap();

        let mut hs = Handshake::new(&mut server, &mut buf, &creds);
        hs.greeting().await.unwrap();

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x02]);
    }

    #[tokio::test]
    async fn test_greeting_with_max_methods_fits_minimum_buffer() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        // The smallest buffer size validate() accepts
        let mut buf = vec![0u8; 256];

        let mut bytes = vec![0x05, 0xFF];
        bytes.extend_from_slice(&[0x00; 255]);
        client.write_all(&bytes).await.unwrap();

        let mut hs = Handshake::new(&mut server, &mut buf, &creds);
        hs.greeting().await.unwrap();

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x02]);
    }

    #[tokio::test]
    async fn test_truncated_greeting_aborts() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        client.write_all(&[0x05]).await.unwrap();
        drop(client);

        let mut hs = Handshake::new(&mut server, &mut buf, &creds);
        assert!(matches!(hs.greeting().await, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_authenticate_accepts_exact_match() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        client
            .write_all(&auth_bytes(b"admin", b"admin"))
            .await
            .unwrap();

        let mut hs = Handshake::new(&mut server, &mut buf, &creds);
        hs.authenticate().await.unwrap();

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [AUTH_VERSION, AUTH_SUCCESS]);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_wrong_password() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        client
            .write_all(&auth_bytes(b"admin", b"hunter2"))
            .await
            .unwrap();

        let mut hs = Handshake::new(&mut server, &mut buf, &creds);
        assert!(matches!(
            hs.authenticate().await,
            Err(Error::Authentication)
        ));

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [AUTH_VERSION, AUTH_FAILURE]);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_prefix_username() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        // "admi" is a prefix of "admin", must still fail
        client
            .write_all(&auth_bytes(b"admi", b"admin"))
            .await
            .unwrap();

        let mut hs = Handshake::new(&mut server, &mut buf, &creds);
        assert!(matches!(
            hs.authenticate().await,
            Err(Error::Authentication)
        ));
    }

    #[tokio::test]
    async fn test_request_rejects_non_connect() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        // CMD 0x02 is BIND
        client.write_all(&[0x05, 0x02, 0x00, 0x01]).await.unwrap();

        let mut hs = Handshake::new(&mut server, &mut buf, &creds);
        let err = hs.read_request().await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedCommand(0x02)));

        // Silent close: no reply bytes were written
        drop(server);
        let mut scratch = [0u8; 16];
        assert_eq!(client.read(&mut scratch).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_request_parses_ipv4() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90])
            .await
            .unwrap();

        let mut hs = Handshake::new(&mut server, &mut buf, &creds);
        let request = hs.read_request().await.unwrap();
        assert_eq!(
            request.target,
            TargetAddr::Ipv4(Ipv4Addr::new(127, 0, 0, 1))
        );
        assert_eq!(request.port, 8080);
        assert_eq!(request.endpoint(), "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_request_parses_domain() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        let mut bytes = vec![0x05, 0x01, 0x00, 0x03, 11];
        bytes.extend_from_slice(b"example.com");
        bytes.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&bytes).await.unwrap();

        let mut hs = Handshake::new(&mut server, &mut buf, &creds);
        let request = hs.read_request().await.unwrap();
        assert_eq!(request.target, TargetAddr::Domain("example.com".into()));
        assert_eq!(request.endpoint(), "example.com:443");
    }

    #[tokio::test]
    async fn test_request_parses_ipv6() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        let mut bytes = vec![0x05, 0x01, 0x00, 0x04];
        bytes.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        bytes.extend_from_slice(&8080u16.to_be_bytes());
        client.write_all(&bytes).await.unwrap();

        let mut hs = Handshake::new(&mut server, &mut buf, &creds);
        let request = hs.read_request().await.unwrap();
        assert_eq!(request.target, TargetAddr::Ipv6(Ipv6Addr::LOCALHOST));
        assert_eq!(request.endpoint(), "[::1]:8080");
    }

    #[tokio::test]
    async fn test_request_unknown_atyp_leaves_target_unset() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        // ATYP 0x09 carries no address bytes, only the port follows
        client
            .write_all(&[0x05, 0x01, 0x00, 0x09, 0x1F, 0x90])
            .await
            .unwrap();

        let mut hs = Handshake::new(&mut server, &mut buf, &creds);
        let request = hs.read_request().await.unwrap();
        assert_eq!(request.target, TargetAddr::Unknown);
        assert_eq!(request.port, 8080);
        assert_eq!(request.endpoint(), ":8080");
    }

    #[tokio::test]
    async fn test_run_establishes_tunnel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        // The whole client script fits in the duplex buffer up front
        let mut script = vec![0x05, 0x01, 0x02];
        script.extend_from_slice(&auth_bytes(b"admin", b"admin"));
        script.extend_from_slice(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1]);
        script.extend_from_slice(&target_addr.port().to_be_bytes());
        client.write_all(&script).await.unwrap();

        let established = Handshake::new(&mut server, &mut buf, &creds)
            .run()
            .await
            .unwrap();
        assert_eq!(established.request.port, target_addr.port());

        let mut replies = [0u8; 14];
        client.read_exact(&mut replies).await.unwrap();
        assert_eq!(&replies[..2], &[0x05, 0x02]);
        assert_eq!(&replies[2..4], &[AUTH_VERSION, AUTH_SUCCESS]);
        assert_eq!(
            &replies[4..],
            &[0x05, REP_SUCCESS, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn test_run_replies_general_failure_on_dial_error() {
        // Bind then drop to find a port that refuses connections
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = listener.local_addr().unwrap();
        drop(listener);

        let (mut client, mut server) = tokio::io::duplex(1024);
        let creds = test_credentials();
        let mut buf = vec![0u8; 512];

        let mut script = vec![0x05, 0x01, 0x02];
        script.extend_from_slice(&auth_bytes(b"admin", b"admin"));
        script.extend_from_slice(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1]);
        script.extend_from_slice(&dead_addr.port().to_be_bytes());
        client.write_all(&script).await.unwrap();

        let err = Handshake::new(&mut server, &mut buf, &creds)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dial(_)));

        let mut replies = [0u8; 14];
        client.read_exact(&mut replies).await.unwrap();
        assert_eq!(
            &replies[4..],
            &[0x05, REP_GENERAL_FAILURE, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }
}
