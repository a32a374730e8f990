//! End-to-end scenarios against a live server on an ephemeral port.
//!
//! Each test starts a scheduler, connects raw TCP clients, and speaks the
//! wire protocol directly (null confidentiality wrapper).

use std::sync::Arc;
use std::time::Duration;

use flagduel_protocol::{FLAG_TOKEN_LEN, Frame, Tag, encode, read_frame, write_frame};
use flagduel_server::config::ServerConfig;
use flagduel_server::scheduler::Scheduler;
use flagduel_server::shutdown::shutdown_channel;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long a test waits for an expected frame.
const RECV_TIMEOUT: Duration = Duration::from_millis(1500);

/// How long a test waits to confirm that nothing arrives.
const SILENCE_WINDOW: Duration = Duration::from_millis(300);

struct TestServer {
    addr: std::net::SocketAddr,
    scheduler: Arc<Scheduler>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    async fn start(max_games: usize) -> TestServer {
        let config = ServerConfig {
            max_games,
            accept_idle: Duration::from_millis(10),
            handler_timer: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(2),
            ..ServerConfig::default()
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let scheduler = Scheduler::new(config, shutdown_rx);
        let runner = scheduler.clone();
        let task = tokio::spawn(async move { runner.run(listener).await });

        TestServer {
            addr,
            scheduler,
            shutdown_tx,
            task,
        }
    }

    async fn stop(self) {
        self.shutdown_tx.send(true).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

struct TestClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl TestClient {
    async fn connect(addr: std::net::SocketAddr) -> TestClient {
        let stream = TcpStream::connect(addr).await.unwrap();
        TestClient {
            stream,
            buf: Vec::new(),
        }
    }

    async fn send(&mut self, tag: Tag, payload: &[u8]) {
        let frame = encode(tag, payload);
        write_frame(&mut self.stream, &frame).await.unwrap();
    }

    /// Receive one raw frame, failing the test on timeout or EOF.
    async fn recv_bytes(&mut self) -> Vec<u8> {
        tokio::time::timeout(RECV_TIMEOUT, read_frame(&mut self.stream, &mut self.buf))
            .await
            .expect("timed out waiting for a frame")
            .expect("read failed")
            .expect("connection closed while a frame was expected")
    }

    /// Receive one frame and decode its leading segment.
    async fn recv(&mut self) -> (Tag, Vec<u8>) {
        let bytes = self.recv_bytes().await;
        let frame = Frame::parse(&bytes).unwrap();
        let segment = frame.leading().unwrap();
        (segment.tag, segment.payload.to_vec())
    }

    /// Assert that no frame arrives within the silence window.
    async fn expect_silence(&mut self) {
        let result =
            tokio::time::timeout(SILENCE_WINDOW, read_frame(&mut self.stream, &mut self.buf))
                .await;
        assert!(result.is_err(), "expected silence, got {result:?}");
    }

    /// Assert the server closes this connection.
    async fn expect_eof(&mut self) {
        let frame = tokio::time::timeout(RECV_TIMEOUT, read_frame(&mut self.stream, &mut self.buf))
            .await
            .expect("timed out waiting for EOF")
            .expect("read failed");
        assert!(frame.is_none(), "expected EOF, got {frame:?}");
    }

    /// Consume the provisioning opener and install a flag under `dir`.
    /// Returns the seat's token as the server generated it.
    async fn provision(&mut self, dir: &str) -> Vec<u8> {
        let (tag, payload) = self.recv().await;
        assert_eq!(tag, Tag::Flg);
        assert_eq!(payload, b"FLG_DIR");

        self.send(Tag::Flg, dir.as_bytes()).await;
        let (tag, payload) = self.recv().await;
        assert_eq!(tag, Tag::Flg);
        let token = extract_token(&payload, dir);

        self.send(Tag::Flg, b"okay").await;
        token
    }
}

/// Pull the token out of `echo '<token>' > <dir>/flag.txt`.
fn extract_token(payload: &[u8], dir: &str) -> Vec<u8> {
    let text = std::str::from_utf8(payload).unwrap();
    let prefix = "echo '";
    let suffix = format!("' > {dir}/flag.txt");
    assert!(text.starts_with(prefix), "unexpected payload {text:?}");
    assert!(text.ends_with(&suffix), "unexpected payload {text:?}");
    let token = &text[prefix.len()..text.len() - suffix.len()];
    assert_eq!(token.len(), FLAG_TOKEN_LEN);
    token.as_bytes().to_vec()
}

/// Connect two clients and provision both seats.
async fn ready_pair(server: &TestServer) -> (TestClient, Vec<u8>, TestClient, Vec<u8>) {
    let mut a = TestClient::connect(server.addr).await;
    let token_a = a.provision("/tmp/a").await;
    let mut b = TestClient::connect(server.addr).await;
    let token_b = b.provision("/tmp/b").await;
    // Both acks are in flight; give the handlers a beat to go READY.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (a, token_a, b, token_b)
}

#[tokio::test]
async fn s1_pairing_opens_provisioning_for_both_seats() {
    let server = TestServer::start(10).await;

    let mut a = TestClient::connect(server.addr).await;
    let opener = a.recv_bytes().await;
    assert_eq!(opener, b"tlength:41;type:FLG;length:7;data:FLG_DIR");

    let mut b = TestClient::connect(server.addr).await;
    let opener = b.recv_bytes().await;
    assert_eq!(opener, b"tlength:41;type:FLG;length:7;data:FLG_DIR");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.scheduler.active_games(), 1);
    assert_eq!(server.scheduler.live_handlers(), 2);

    server.stop().await;
}

#[tokio::test]
async fn s2_flag_provisioning_succeeds() {
    let server = TestServer::start(10).await;

    let mut a = TestClient::connect(server.addr).await;
    let (tag, payload) = a.recv().await;
    assert_eq!((tag, payload.as_slice()), (Tag::Flg, b"FLG_DIR".as_slice()));

    a.send(Tag::Flg, b"/tmp/x").await;
    let (tag, payload) = a.recv().await;
    assert_eq!(tag, Tag::Flg);
    let token = extract_token(&payload, "/tmp/x");
    assert!(token.iter().all(u8::is_ascii_alphanumeric));

    a.send(Tag::Flg, b"okay").await;
    a.expect_silence().await;

    server.stop().await;
}

#[tokio::test]
async fn s2b_rejected_directory_gets_flag_error_and_retry() {
    let server = TestServer::start(10).await;

    let mut a = TestClient::connect(server.addr).await;
    let (_, payload) = a.recv().await;
    assert_eq!(payload, b"FLG_DIR");

    a.send(Tag::Flg, b"/tmp/../escape").await;
    let (tag, payload) = a.recv().await;
    assert_eq!((tag, payload.as_slice()), (Tag::Flg, b"error".as_slice()));

    // The seat is back in AwaitDir; a clean directory still works.
    a.send(Tag::Flg, b"/tmp/retry").await;
    let (tag, payload) = a.recv().await;
    assert_eq!(tag, Tag::Flg);
    extract_token(&payload, "/tmp/retry");

    server.stop().await;
}

#[tokio::test]
async fn s2c_five_bad_directories_drop_the_seat() {
    let server = TestServer::start(10).await;

    let mut a = TestClient::connect(server.addr).await;
    let (_, payload) = a.recv().await;
    assert_eq!(payload, b"FLG_DIR");

    for _ in 0..4 {
        a.send(Tag::Flg, b"/etc/nope").await;
        let (tag, payload) = a.recv().await;
        assert_eq!((tag, payload.as_slice()), (Tag::Flg, b"error".as_slice()));
    }
    a.send(Tag::Flg, b"/etc/nope").await;
    a.expect_eof().await;

    server.stop().await;
}

#[tokio::test]
async fn s3_relay_forwards_allowed_and_rejects_banned() {
    let server = TestServer::start(10).await;
    let (mut a, _token_a, mut b, _token_b) = ready_pair(&server).await;

    // Allowed command: B receives the identical bytes, A hears nothing.
    let ls_frame = encode(Tag::Cmd, b"ls");
    a.send(Tag::Cmd, b"ls").await;
    let relayed = b.recv_bytes().await;
    assert_eq!(relayed, ls_frame);
    a.expect_silence().await;

    // Banned command: A gets the policy error, B hears nothing.
    a.send(Tag::Cmd, b"rm -rf /").await;
    let (tag, payload) = a.recv().await;
    assert_eq!(tag, Tag::Err);
    assert_eq!(payload, b"command not allowed");
    b.expect_silence().await;

    server.stop().await;
}

#[tokio::test]
async fn s3b_non_cmd_frames_relay_verbatim() {
    let server = TestServer::start(10).await;
    let (mut a, _, mut b, _) = ready_pair(&server).await;

    let cwd_frame = encode(Tag::Cwd, b"/home/player");
    a.send(Tag::Cwd, b"/home/player").await;
    assert_eq!(b.recv_bytes().await, cwd_frame);

    let out_frame = encode(Tag::Out, b"total 0\ndrwxr-xr-x 2 p p 40 .");
    b.send(Tag::Out, b"total 0\ndrwxr-xr-x 2 p p 40 .").await;
    assert_eq!(a.recv_bytes().await, out_frame);

    server.stop().await;
}

#[tokio::test]
async fn s4_submitting_the_opponents_token_wins() {
    let server = TestServer::start(10).await;
    let (mut a, _token_a, mut b, token_b) = ready_pair(&server).await;

    a.send(Tag::Cmd, &token_b).await;

    let (tag, payload) = a.recv().await;
    assert_eq!((tag, payload.as_slice()), (Tag::Out, b"you won".as_slice()));
    let (tag, payload) = b.recv().await;
    assert_eq!((tag, payload.as_slice()), (Tag::Out, b"you lost".as_slice()));

    // Both handlers exit and the slot is reclaimed.
    a.expect_eof().await;
    b.expect_eof().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.scheduler.live_handlers(), 0);
    assert_eq!(server.scheduler.active_games(), 0);

    server.stop().await;
}

#[tokio::test]
async fn s5_peer_departure_notifies_the_survivor_once() {
    let server = TestServer::start(10).await;
    let (mut a, _, b, _) = ready_pair(&server).await;

    drop(b);

    let (tag, payload) = a.recv().await;
    assert_eq!(tag, Tag::Err);
    assert_eq!(payload, b"Second client disconnected");

    a.expect_eof().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.scheduler.live_handlers(), 0);
    assert_eq!(server.scheduler.active_games(), 0);

    server.stop().await;
}

#[tokio::test]
async fn s6_capacity_rejects_a_third_client() {
    let server = TestServer::start(1).await;

    let mut a = TestClient::connect(server.addr).await;
    let (_, payload) = a.recv().await;
    assert_eq!(payload, b"FLG_DIR");
    let mut b = TestClient::connect(server.addr).await;
    let (_, payload) = b.recv().await;
    assert_eq!(payload, b"FLG_DIR");

    let mut c = TestClient::connect(server.addr).await;
    let (tag, payload) = c.recv().await;
    assert_eq!(tag, Tag::Err);
    assert_eq!(payload, b"game limit reached");
    c.expect_eof().await;

    // The existing game is unaffected: both seats still provision.
    let token_a = a.provision_after_opener("/tmp/a").await;
    let token_b = b.provision_after_opener("/tmp/b").await;
    assert_ne!(token_a, token_b);

    server.stop().await;
}

#[tokio::test]
async fn wait_notice_when_peer_is_not_ready() {
    let server = TestServer::start(10).await;

    let mut a = TestClient::connect(server.addr).await;
    a.provision("/tmp/solo").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    a.send(Tag::Cmd, b"ls").await;
    let (tag, payload) = a.recv().await;
    assert_eq!(tag, Tag::Err);
    assert_eq!(payload, b"wait for second client");

    server.stop().await;
}

#[tokio::test]
async fn gameplay_frames_before_ready_are_discarded() {
    let server = TestServer::start(10).await;

    let mut a = TestClient::connect(server.addr).await;
    let (_, payload) = a.recv().await;
    assert_eq!(payload, b"FLG_DIR");

    // Still in AwaitDir: a CMD must be swallowed without any reply.
    a.send(Tag::Cmd, b"ls").await;
    a.expect_silence().await;

    server.stop().await;
}

#[tokio::test]
async fn malformed_frames_are_discarded_without_disconnect() {
    let server = TestServer::start(10).await;
    let (mut a, _, mut b, _) = ready_pair(&server).await;

    // Valid envelope, overdeclared segment length: discarded, seat stays.
    let body = b"type:CMD;length:9;data:ls";
    let mut bad = format!("tlength:{};", body.len() + 11).into_bytes();
    bad.extend_from_slice(body);
    write_frame(&mut a.stream, &bad).await.unwrap();
    b.expect_silence().await;

    // The connection is still usable.
    a.send(Tag::Cmd, b"pwd").await;
    let relayed = b.recv_bytes().await;
    assert_eq!(relayed, encode(Tag::Cmd, b"pwd"));

    server.stop().await;
}

#[tokio::test]
async fn command_length_boundary_is_enforced_on_the_wire() {
    let server = TestServer::start(10).await;
    let (mut a, _, mut b, _) = ready_pair(&server).await;

    let mut cmd = b"echo ".to_vec();
    cmd.resize(250, b'a');
    a.send(Tag::Cmd, &cmd).await;
    assert_eq!(b.recv_bytes().await, encode(Tag::Cmd, &cmd));

    cmd.resize(251, b'a');
    a.send(Tag::Cmd, &cmd).await;
    let (tag, payload) = a.recv().await;
    assert_eq!(tag, Tag::Err);
    assert_eq!(payload, b"command not allowed");
    b.expect_silence().await;

    server.stop().await;
}

#[tokio::test]
async fn shutdown_drains_every_handler() {
    let server = TestServer::start(10).await;
    let (mut a, _, mut b, _) = ready_pair(&server).await;
    assert_eq!(server.scheduler.live_handlers(), 2);

    let scheduler = server.scheduler.clone();
    server.stop().await;

    assert_eq!(scheduler.live_handlers(), 0);
    a.expect_eof().await;
    b.expect_eof().await;
}

#[tokio::test]
async fn two_games_run_independently() {
    let server = TestServer::start(10).await;
    let (mut a1, _, mut b1, token_b1) = ready_pair(&server).await;
    let (mut a2, _, mut b2, _) = ready_pair(&server).await;
    assert_eq!(server.scheduler.active_games(), 2);
    assert_eq!(server.scheduler.live_handlers(), 4);

    // Game one finishes by a win; game two keeps relaying.
    a1.send(Tag::Cmd, &token_b1).await;
    let (_, payload) = a1.recv().await;
    assert_eq!(payload, b"you won");
    let (_, payload) = b1.recv().await;
    assert_eq!(payload, b"you lost");

    a2.send(Tag::Cmd, b"ls").await;
    assert_eq!(b2.recv_bytes().await, encode(Tag::Cmd, b"ls"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.scheduler.active_games(), 1);
    assert_eq!(server.scheduler.live_handlers(), 2);

    server.stop().await;
}

impl TestClient {
    /// Like [`TestClient::provision`] but for a client that already consumed
    /// the `FLG_DIR` opener.
    async fn provision_after_opener(&mut self, dir: &str) -> Vec<u8> {
        self.send(Tag::Flg, dir.as_bytes()).await;
        let (tag, payload) = self.recv().await;
        assert_eq!(tag, Tag::Flg);
        let token = extract_token(&payload, dir);
        self.send(Tag::Flg, b"okay").await;
        token
    }
}
