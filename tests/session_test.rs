//! End-to-end tests for the session controller
//!
//! A simulated gateway answers the watermark and login over an in-memory
//! duplex stream, the virtual interface is a channel pair and DHCP is a
//! fake that always succeeds.

use async_trait::async_trait;
use bytes::Bytes;
use softvpn::device::{MemoryPeer, MemoryProvider};
use softvpn::dhcp::{Lease, LeaseError, LeaseProvider};
use softvpn::protocol::{Credentials, HandshakeError, RecordSet};
use softvpn::session::{Collaborators, ConnState, ErrorCode, Session, SessionConfig, Status};
use softvpn::transport::{Dialed, Dialer, TransportError};
use softvpn::tunnel::pack;
use softvpn::Error;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{
    duplex, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Hands out one pre-made duplex stream
struct DuplexDialer {
    stream: Mutex<Option<DuplexStream>>,
}

#[async_trait]
impl Dialer for DuplexDialer {
    async fn dial(&self, _addr: &str) -> Result<Dialed, TransportError> {
        let stream = self
            .stream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::ConnectionFailed("already dialed".into()))?;
        Ok(Dialed {
            stream: Box::new(stream),
            local_addr: Some("192.0.2.10:50000".parse().unwrap()),
        })
    }
}

struct FakeDhcp;

#[async_trait]
impl LeaseProvider for FakeDhcp {
    async fn interfaces(&self) -> Result<Vec<String>, LeaseError> {
        Ok(vec!["lo".to_string(), "vpn_go".to_string()])
    }

    async fn acquire(
        &self,
        interfaces: &[String],
        _attempt_timeout: Duration,
        _attempts: u32,
    ) -> Result<Lease, LeaseError> {
        Ok(Lease {
            interface: interfaces[0].clone(),
            address: Some(Ipv4Addr::new(192, 168, 30, 10)),
            prefix_len: Some(24),
            ..Default::default()
        })
    }

    async fn configure(&self, _lease: &Lease) -> Result<(), LeaseError> {
        Ok(())
    }
}

/// Read one request off the gateway side, returning its body
async fn read_request(server: &mut BufReader<DuplexStream>) -> Vec<u8> {
    let mut length = 0;
    loop {
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                length = value.trim().parse().unwrap();
            }
        }
    }
    let mut body = vec![0u8; length];
    server.read_exact(&mut body).await.unwrap();
    body
}

async fn respond(server: &mut BufReader<DuplexStream>, record: &RecordSet) {
    let body = record.encode().unwrap();
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    let stream = server.get_mut();
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();
}

/// Serve watermark/hello and login/`reply`, then hand back the connection
fn gateway(server: DuplexStream, reply: RecordSet) -> JoinHandle<BufReader<DuplexStream>> {
    tokio::spawn(async move {
        let mut server = BufReader::new(server);

        read_request(&mut server).await;
        let mut hello = RecordSet::new();
        hello.insert("hello", "SoftEther VPN Server");
        hello.insert("version", 443u32);
        hello.insert("build", 9680u32);
        respond(&mut server, &hello).await;

        let login = RecordSet::decode(&read_request(&mut server).await).unwrap();
        assert_eq!(login.get("username").and_then(|v| v.as_str()), Some("alice"));
        respond(&mut server, &reply).await;
        server
    })
}

struct Harness {
    session: Session,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    notifications: Arc<Mutex<Vec<Status>>>,
    gateway: JoinHandle<BufReader<DuplexStream>>,
}

fn harness(reply: RecordSet, interfaces: Option<MemoryProvider>) -> Harness {
    let (client, server) = duplex(64 * 1024);
    let gateway = gateway(server, reply);

    let (provider, peers) = match interfaces {
        Some(provider) => (provider, mpsc::unbounded_channel().1),
        None => MemoryProvider::new(),
    };

    let notifications = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&notifications);
    let collaborators = Collaborators::new(
        Arc::new(DuplexDialer {
            stream: Mutex::new(Some(client)),
        }),
        Arc::new(provider),
        Arc::new(FakeDhcp),
    )
    .with_observer(Arc::new(move |status: Status| seen.lock().unwrap().push(status)));

    let config = SessionConfig::new("vpn.example.com", Credentials::new("alice", "s3cret"));
    Harness {
        session: Session::new(config, collaborators),
        peers,
        notifications,
        gateway,
    }
}

fn notified(notifications: &Mutex<Vec<Status>>) -> Vec<Status> {
    notifications.lock().unwrap().clone()
}

#[tokio::test]
async fn test_rejected_credentials() {
    let mut reply = RecordSet::new();
    reply.insert("error", 9u32);
    let h = harness(reply, None);

    let result = h.session.connect().await;
    assert!(matches!(
        result,
        Err(Error::Handshake(HandshakeError::Rejected { code: Some(9) }))
    ));

    let status = h.session.status();
    assert_eq!(status.state, ConnState::Disconnected);
    assert_eq!(status.error, ErrorCode::CredentialsRejected);
    assert_eq!(notified(&h.notifications), vec![status]);
}

#[tokio::test]
async fn test_error_field_zero_still_fails_login() {
    let mut reply = RecordSet::new();
    reply.insert("error", 0u32);
    let h = harness(reply, None);

    let result = h.session.connect().await;
    assert!(matches!(
        result,
        Err(Error::Handshake(HandshakeError::Rejected { code: Some(0) }))
    ));
    assert_eq!(
        h.session.status(),
        Status::disconnected(ErrorCode::ConnectFailed)
    );
    assert_eq!(
        notified(&h.notifications),
        vec![Status::disconnected(ErrorCode::ConnectFailed)]
    );
}

#[tokio::test]
async fn test_connected_session_bridges_frames() {
    let mut reply = RecordSet::new();
    reply.insert("session_name", "SID-ALICE-1");
    let mut h = harness(reply, None);

    h.session.connect().await.unwrap();
    assert_eq!(h.session.status(), Status::connected());
    assert_eq!(notified(&h.notifications), vec![Status::connected()]);

    let mut peer = h.peers.recv().await.unwrap();
    assert_eq!(peer.name, "vpn_go");
    let mut server = h.gateway.await.unwrap();

    // interface -> tunnel
    let frame = Bytes::from_static(b"\xff\xff\xff\xff\xff\xff\x02\x00\x00\x00\x00\x01\x08\x06arp");
    peer.inject.send(frame.clone()).await.unwrap();
    let mut framed = vec![0u8; 8 + frame.len()];
    server.read_exact(&mut framed).await.unwrap();
    assert_eq!(framed, pack(1, &frame));

    // tunnel -> interface
    server
        .get_mut()
        .write_all(&pack(1, b"downstream"))
        .await
        .unwrap();
    assert_eq!(
        peer.written.recv().await.unwrap(),
        Bytes::from_static(b"downstream")
    );

    h.session.disconnect();
    let status = h.session.closed().await;
    assert_eq!(status, Status::disconnected(ErrorCode::None));
    peer.wait_closed().await;
    assert_eq!(
        notified(&h.notifications),
        vec![Status::connected(), Status::disconnected(ErrorCode::None)]
    );
}

#[tokio::test]
async fn test_tunnel_loss_reports_connect_failed() {
    let h = harness(RecordSet::new(), None);

    h.session.connect().await.unwrap();
    let server = h.gateway.await.unwrap();
    drop(server);

    let status = h.session.closed().await;
    assert_eq!(status, Status::disconnected(ErrorCode::ConnectFailed));
    assert_eq!(
        notified(&h.notifications),
        vec![
            Status::connected(),
            Status::disconnected(ErrorCode::ConnectFailed)
        ]
    );
}

#[tokio::test]
async fn test_interface_permission_denied() {
    let h = harness(RecordSet::new(), Some(MemoryProvider::denying()));

    let result = h.session.connect().await;
    assert!(matches!(
        result,
        Err(Error::Handshake(HandshakeError::Device(_)))
    ));
    assert_eq!(
        h.session.status(),
        Status::disconnected(ErrorCode::PermissionDenied)
    );
    assert_eq!(notified(&h.notifications).len(), 1);
}

#[tokio::test]
async fn test_second_connect_while_active() {
    let h = harness(RecordSet::new(), None);

    h.session.connect().await.unwrap();
    assert!(matches!(h.session.connect().await, Err(Error::AlreadyActive)));

    h.session.disconnect();
    h.session.closed().await;
}
