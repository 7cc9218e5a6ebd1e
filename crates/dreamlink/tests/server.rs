//! Integration tests for the Dreamlink server: full login hand-off over
//! real sockets, match-service state machine, and the content exchange.

use std::net::SocketAddr;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use dreamlink::{ContentFile, DreamlinkServer, ServerConfig};
use dreamlink_protocol::{EscapedForm, MatchReply, MatchRequest, UrlForm};
use dreamlink_session::{challenge_hash, login_proof, MemoryStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const USER_ID: &str = "4225551234567";
const SECRET: &str = "000";
const SYNC_ID: &str = "ABCD123456";

// =========================================================================
// Harness
// =========================================================================

async fn start(config: ServerConfig) -> (SocketAddr, SocketAddr) {
    let server = DreamlinkServer::<MemoryStore>::builder()
        .bind_match("127.0.0.1:0")
        .bind_http(([127, 0, 0, 1], 0).into())
        .server_config(config)
        .build(MemoryStore::new())
        .await
        .expect("server should build");

    let match_addr = server.match_addr().expect("bound");
    let http_addr = server.http_addr();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    (match_addr, http_addr)
}

/// Minimal HTTP/1.1 client: one request, `Connection: close`, full read.
async fn http_request(
    addr: SocketAddr,
    method: &str,
    path_and_query: &str,
    headers: &[(&str, String)],
    body: &[u8],
) -> (u16, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.expect("connect http");

    let mut request = format!(
        "{method} {path_and_query} HTTP/1.1\r\nHost: dreamlink.test\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await.expect("send head");
    stream.write_all(body).await.expect("send body");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read response");

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header terminator");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status code");
    (status, raw[split + 4..].to_vec())
}

fn basic_auth() -> (&'static str, String) {
    (
        "Authorization",
        format!("Basic {}", BASE64_STANDARD.encode("dream:dream")),
    )
}

/// Posts to the login endpoint and returns the decoded response fields.
async fn auth_post(http: SocketAddr, fields: &[(&str, &str)]) -> Vec<(String, String)> {
    let form = UrlForm::obfuscated();
    let body = form.encode(
        &fields
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect::<Vec<_>>(),
    );
    let (status, body) = http_request(http, "POST", "/ac", &[], body.as_bytes()).await;
    assert_eq!(status, 200);
    form.decode(std::str::from_utf8(&body).expect("utf8 body"))
        .expect("decodable response")
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> &'a str {
    fields
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
        .unwrap_or_else(|| panic!("missing field `{name}` in {fields:?}"))
}

/// A match-service client connection with frame reassembly.
struct MatchClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl MatchClient {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.expect("connect match"),
            buf: Vec::new(),
        }
    }

    async fn send(&mut self, request: &MatchRequest) {
        let bytes = EscapedForm::encode(&request.to_fields());
        self.stream.write_all(&bytes).await.expect("send frame");
    }

    async fn recv(&mut self) -> MatchReply {
        loop {
            if let Some(end) = self
                .buf
                .windows(7)
                .position(|w| w == b"\\final\\")
                .map(|i| i + 7)
            {
                let rest = self.buf.split_off(end);
                let frame = std::mem::replace(&mut self.buf, rest);
                let fields = EscapedForm::decode(&frame).expect("well-formed frame");
                return MatchReply::from_fields(&fields).expect("known reply");
            }
            let mut chunk = [0u8; 1024];
            let n = tokio::time::timeout(
                Duration::from_secs(5),
                self.stream.read(&mut chunk),
            )
            .await
            .expect("reply within timeout")
            .expect("readable");
            assert!(n > 0, "connection closed while waiting for a reply");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Waits for the greeting and returns the server challenge.
    async fn greeting(&mut self) -> String {
        match self.recv().await {
            MatchReply::Challenge { server_challenge } => server_challenge,
            other => panic!("expected challenge greeting, got {other:?}"),
        }
    }
}

/// Runs the full HTTP login and returns `(token, login challenge)`.
async fn obtain_match_session(http: SocketAddr) -> (String, String) {
    let fields = auth_post(
        http,
        &[
            ("action", "login"),
            ("userid", USER_ID),
            ("passwd", SECRET),
            ("branch", "branchA"),
        ],
    )
    .await;
    assert_eq!(field(&fields, "returncd"), "001");
    (
        field(&fields, "token").to_string(),
        field(&fields, "challenge").to_string(),
    )
}

// =========================================================================
// Crafted save fragments
// =========================================================================

/// Builds an encrypted 236-byte record the way a console would.
///
/// Uses a personality whose shuffle index is 0, so the block permutation
/// is the identity and the builder only needs the cipher.
fn crafted_fragment(species: u16, level: u8) -> Vec<u8> {
    let personality: u32 = 5; // (5 >> 13) % 24 == 0
    let mut buf = vec![0u8; 236];
    buf[0x00..0x04].copy_from_slice(&personality.to_le_bytes());
    buf[0x08..0x0A].copy_from_slice(&species.to_le_bytes());
    buf[0x0C..0x0E].copy_from_slice(&7u16.to_le_bytes()); // trainer id
    buf[0x15] = 9; // ability
    buf[0x8C] = level;
    // 0xFFFF terminators for the name fields.
    for off in (0x48..0x48 + 22).step_by(2) {
        buf[off..off + 2].copy_from_slice(&0xFFFFu16.to_le_bytes());
    }
    for off in (0x68..0x68 + 16).step_by(2) {
        buf[off..off + 2].copy_from_slice(&0xFFFFu16.to_le_bytes());
    }

    let checksum = (0x08..0x88).step_by(2).fold(0u16, |sum, i| {
        sum.wrapping_add(u16::from_le_bytes([buf[i], buf[i + 1]]))
    });
    buf[0x06..0x08].copy_from_slice(&checksum.to_le_bytes());

    dreamlink_dream::decrypt_block(&mut buf, 0x08, 0x80, u32::from(checksum)).unwrap();
    dreamlink_dream::decrypt_block(&mut buf, 0x88, 0x64, personality).unwrap();
    buf
}

// =========================================================================
// Login hand-off, end to end
// =========================================================================

#[tokio::test]
async fn test_login_handoff_and_match_session() {
    let (match_addr, http) = start(ServerConfig::default()).await;

    // A never-before-seen 13-digit id with registration-through-login on.
    let (token, login_challenge) = obtain_match_session(http).await;

    let mut client = MatchClient::connect(match_addr).await;
    let server_challenge = client.greeting().await;

    let hash = challenge_hash(&login_challenge);
    let client_challenge = "AAAAAAAAAA";
    let response = login_proof(&hash, USER_ID, client_challenge, &server_challenge);

    client
        .send(&MatchRequest::Login {
            token: token.clone(),
            client_challenge: client_challenge.to_string(),
            response,
        })
        .await;

    let (profile_id, session_key) = match client.recv().await {
        MatchReply::LoginOk {
            user_id,
            profile_id,
            proof,
            session_key,
        } => {
            assert_eq!(user_id, USER_ID);
            assert!(profile_id > 0);
            // The server's answering proof swaps the challenge order.
            assert_eq!(
                proof,
                login_proof(&hash, USER_ID, &server_challenge, client_challenge)
            );
            (profile_id, session_key)
        }
        other => panic!("expected login ok, got {other:?}"),
    };

    // Keepalive and status echo the identity.
    client.send(&MatchRequest::KeepAlive { session_key }).await;
    assert_eq!(
        client.recv().await,
        MatchReply::KeepAliveAck {
            user_id: USER_ID.to_string()
        }
    );

    // Profile fetch returns the bound profile.
    client.send(&MatchRequest::ProfileGet { session_key }).await;
    match client.recv().await {
        MatchReply::ProfileInfo { profile_id: pid, .. } => assert_eq!(pid, profile_id),
        other => panic!("expected profile info, got {other:?}"),
    }

    // A wrong session key is rejected without killing the connection.
    client
        .send(&MatchRequest::ProfileGet {
            session_key: session_key.wrapping_add(1),
        })
        .await;
    match client.recv().await {
        MatchReply::Error { fatal, .. } => assert!(!fatal),
        other => panic!("expected error, got {other:?}"),
    }
    client.send(&MatchRequest::KeepAlive { session_key }).await;
    assert!(matches!(client.recv().await, MatchReply::KeepAliveAck { .. }));

    // The token was consumed by the successful login: replaying it on a
    // fresh connection is rejected.
    let mut replay = MatchClient::connect(match_addr).await;
    let second_challenge = replay.greeting().await;
    let replay_response =
        login_proof(&hash, USER_ID, client_challenge, &second_challenge);
    replay
        .send(&MatchRequest::Login {
            token,
            client_challenge: client_challenge.to_string(),
            response: replay_response,
        })
        .await;
    match replay.recv().await {
        MatchReply::Error { fatal, .. } => assert!(fatal),
        other => panic!("expected fatal error for replayed token, got {other:?}"),
    }
}

#[tokio::test]
async fn test_login_rejects_bad_and_swapped_proofs() {
    let (match_addr, http) = start(ServerConfig::default()).await;

    // Swapped challenge order: a proof computed server-challenge-first
    // must never pass client verification.
    let (token, login_challenge) = obtain_match_session(http).await;
    let hash = challenge_hash(&login_challenge);

    let mut client = MatchClient::connect(match_addr).await;
    let server_challenge = client.greeting().await;
    let swapped = login_proof(&hash, USER_ID, &server_challenge, "AAAAAAAAAA");
    client
        .send(&MatchRequest::Login {
            token,
            client_challenge: "AAAAAAAAAA".to_string(),
            response: swapped,
        })
        .await;
    assert!(matches!(
        client.recv().await,
        MatchReply::Error { fatal: true, .. }
    ));

    // Garbage proof with a fresh token fails the same way.
    let (token, _) = obtain_match_session(http).await;
    let mut client = MatchClient::connect(match_addr).await;
    let _ = client.greeting().await;
    client
        .send(&MatchRequest::Login {
            token,
            client_challenge: "AAAAAAAAAA".to_string(),
            response: "0123456789abcdef0123456789abcdef".to_string(),
        })
        .await;
    assert!(matches!(
        client.recv().await,
        MatchReply::Error { fatal: true, .. }
    ));
}

#[tokio::test]
async fn test_match_rejects_message_before_login() {
    let (match_addr, _http) = start(ServerConfig::default()).await;

    let mut client = MatchClient::connect(match_addr).await;
    let _ = client.greeting().await;
    client.send(&MatchRequest::KeepAlive { session_key: 1 }).await;
    assert!(matches!(
        client.recv().await,
        MatchReply::Error { fatal: true, .. }
    ));
}

#[tokio::test]
async fn test_logout_clears_session_key() {
    let (match_addr, http) = start(ServerConfig::default()).await;
    let (token, login_challenge) = obtain_match_session(http).await;
    let hash = challenge_hash(&login_challenge);

    let mut client = MatchClient::connect(match_addr).await;
    let server_challenge = client.greeting().await;
    client
        .send(&MatchRequest::Login {
            token,
            client_challenge: "BBBBBBBBBB".to_string(),
            response: login_proof(&hash, USER_ID, "BBBBBBBBBB", &server_challenge),
        })
        .await;
    let MatchReply::LoginOk { session_key, .. } = client.recv().await else {
        panic!("login should succeed");
    };

    client.send(&MatchRequest::Logout { session_key }).await;
    assert_eq!(client.recv().await, MatchReply::LogoutAck);

    // The cleared key no longer authorizes anything.
    client.send(&MatchRequest::KeepAlive { session_key }).await;
    assert!(matches!(
        client.recv().await,
        MatchReply::Error { fatal: false, .. }
    ));
}

// =========================================================================
// Content exchange, end to end
// =========================================================================

/// Registers the user, fetches a content token via service location, and
/// creates the player account.
async fn content_session(http: SocketAddr) -> String {
    let _ = obtain_match_session(http).await; // registers USER_ID

    let fields = auth_post(
        http,
        &[
            ("action", "svcloc"),
            ("userid", USER_ID),
            ("passwd", SECRET),
            ("svc", "content"),
            ("branch", "branchA"),
        ],
    )
    .await;
    assert_eq!(field(&fields, "returncd"), "001");
    let token = field(&fields, "servicetoken").to_string();

    let (status, body) = http_request(
        http,
        "POST",
        &format!("/sync?p=acctcreate&token={token}&gsid={SYNC_ID}&version=2"),
        &[basic_auth()],
        &[],
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(&body[..4], &0u32.to_le_bytes(), "acctcreate should succeed");

    token
}

fn status_word(body: &[u8]) -> u32 {
    u32::from_le_bytes([body[0], body[1], body[2], body[3]])
}

#[tokio::test]
async fn test_content_upload_download_finish_cycle() {
    let (_match_addr, http) = start(ServerConfig::default()).await;
    let token = content_session(http).await;
    let upload_path = format!("/sync?p=upload&token={token}&gsid={SYNC_ID}");

    // A crafted fragment with an out-of-range species is rejected with no
    // player transition.
    let bad = crafted_fragment(9999, 50);
    let (_, body) = http_request(http, "POST", &upload_path, &[basic_auth()], &bad).await;
    assert_eq!(status_word(&body), 4, "undecodable upload is rejected");

    // The player is still awake, so a valid upload goes through.
    let good = crafted_fragment(25, 50);
    let (_, body) = http_request(http, "POST", &upload_path, &[basic_auth()], &good).await;
    assert_eq!(status_word(&body), 0);

    // Now sleeping: a second upload violates the overwrite policy.
    let (_, body) = http_request(http, "POST", &upload_path, &[basic_auth()], &good).await;
    assert_eq!(status_word(&body), 3);

    // Download delivers the version-2 payload after the status word.
    let download_path = format!("/sync?p=download&token={token}&gsid={SYNC_ID}");
    let (_, body) = http_request(http, "GET", &download_path, &[basic_auth()], &[]).await;
    assert_eq!(status_word(&body), 0);
    assert_eq!(body.len(), 4 + 673, "version-2 dream payload");

    // Finish resets the player (default policy), so the next download has
    // nothing to deliver and answers status-style.
    let finish_path = format!("/sync?p=finish&token={token}&gsid={SYNC_ID}");
    let (_, body) = http_request(http, "POST", &finish_path, &[basic_auth()], &[]).await;
    assert_eq!(status_word(&body), 0);

    let (_, body) = http_request(http, "GET", &download_path, &[basic_auth()], &[]).await;
    assert_eq!(status_word(&body), 0);
    assert_eq!(body.len(), 128, "awake player gets the bare acknowledgment");

    // And the awake player accepts a new upload again.
    let (_, body) = http_request(http, "POST", &upload_path, &[basic_auth()], &good).await;
    assert_eq!(status_word(&body), 0);
}

#[tokio::test]
async fn test_content_rejects_bad_auth_and_tokens() {
    let (_match_addr, http) = start(ServerConfig::default()).await;
    let token = content_session(http).await;

    // Wrong basic-auth pair.
    let (_, body) = http_request(
        http,
        "GET",
        &format!("/sync?p=status&token={token}"),
        &[(
            "Authorization",
            format!("Basic {}", BASE64_STANDARD.encode("intruder:intruder")),
        )],
        &[],
    )
    .await;
    assert_eq!(status_word(&body), 1);

    // Unknown token.
    let (_, body) = http_request(
        http,
        "GET",
        "/sync?p=status&token=ffffffffffffffffffffffffffffffff",
        &[basic_auth()],
        &[],
    )
    .await;
    assert_eq!(status_word(&body), 1);

    // A match-service token is not valid on the content service.
    let (match_token, _) = obtain_match_session(http).await;
    let (_, body) = http_request(
        http,
        "GET",
        &format!("/sync?p=status&token={match_token}"),
        &[basic_auth()],
        &[],
    )
    .await;
    assert_eq!(status_word(&body), 1);

    // With a valid session, status acknowledges with the fixed shape.
    let (_, body) = http_request(
        http,
        "GET",
        &format!("/sync?p=status&token={token}"),
        &[basic_auth()],
        &[],
    )
    .await;
    assert_eq!(status_word(&body), 0);
    assert_eq!(body.len(), 128);
}

// =========================================================================
// Login endpoint behaviors
// =========================================================================

#[tokio::test]
async fn test_auth_registration_codes() {
    let (_match_addr, http) = start(ServerConfig::default()).await;

    let fields = auth_post(
        http,
        &[("action", "acctcreate"), ("userid", USER_ID), ("passwd", SECRET)],
    )
    .await;
    assert_eq!(field(&fields, "returncd"), "002");

    let fields = auth_post(
        http,
        &[("action", "acctcreate"), ("userid", USER_ID), ("passwd", SECRET)],
    )
    .await;
    assert_eq!(field(&fields, "returncd"), "104");

    let fields = auth_post(
        http,
        &[("action", "acctcreate"), ("userid", "not13digits"), ("passwd", SECRET)],
    )
    .await;
    assert_eq!(field(&fields, "returncd"), "102");

    // Every response, including failures, carries the timestamp field.
    assert_eq!(field(&fields, "datetime").len(), 14);
}

#[tokio::test]
async fn test_auth_login_without_registration_policy() {
    let config = ServerConfig {
        register_on_login: false,
        ..Default::default()
    };
    let (_match_addr, http) = start(config).await;

    let fields = auth_post(
        http,
        &[
            ("action", "login"),
            ("userid", USER_ID),
            ("passwd", SECRET),
            ("branch", "branchA"),
        ],
    )
    .await;
    assert_eq!(field(&fields, "returncd"), "204");
}

#[tokio::test]
async fn test_auth_unknown_action_is_bad_request() {
    let (_match_addr, http) = start(ServerConfig::default()).await;
    let fields = auth_post(http, &[("action", "teleport")]).await;
    assert_eq!(field(&fields, "returncd"), "102");
}

// =========================================================================
// Content list endpoint
// =========================================================================

#[tokio::test]
async fn test_files_list_and_contents() {
    let config = ServerConfig {
        content_files: vec![ContentFile {
            name: "summer.bin".to_string(),
            file_type: "cgear".to_string(),
            index: 1,
            bytes: vec![0xAB; 8],
        }],
        ..Default::default()
    };
    let (_match_addr, http) = start(config).await;

    let list_body = UrlForm::plain().encode(&[("action".to_string(), "list".to_string())]);
    let (status, body) =
        http_request(http, "POST", "/download", &[], list_body.as_bytes()).await;
    assert_eq!(status, 200);
    let listing = String::from_utf8(body).unwrap();
    assert_eq!(listing, "summer.bin\t\tcgear\t1\t\t10");

    let fetch_body = UrlForm::plain().encode(&[
        ("action".to_string(), "contents".to_string()),
        ("name".to_string(), "summer.bin".to_string()),
    ]);
    let (status, body) =
        http_request(http, "POST", "/download", &[], fetch_body.as_bytes()).await;
    assert_eq!(status, 200);
    assert_eq!(body.len(), 10, "8 data bytes plus the 2-byte trailer");
    assert_eq!(&body[..8], &[0xAB; 8]);

    // Unknown names answer an empty 200; the legacy client treats error
    // statuses as fatal.
    let missing_body = UrlForm::plain().encode(&[
        ("action".to_string(), "contents".to_string()),
        ("name".to_string(), "nope.bin".to_string()),
    ]);
    let (status, body) =
        http_request(http, "POST", "/download", &[], missing_body.as_bytes()).await;
    assert_eq!(status, 200);
    assert!(body.is_empty());
}
