//! REST collaborators against a minimal scripted HTTP server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use base64::Engine;
use pitchside_core::OfflineAction;
use pitchside_store::MemoryQueue;
use pitchside_sync::{
    ApiClient, ApiSettings, NoOpEmitter, OfflineQueue, RestReplayHandler, SyncError,
};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    authorization: Option<String>,
    body: String,
}

struct FakeServer {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeServer {
    /// Answers each request with the next `(status, body)`, then 200 `{}`.
    async fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(VecDeque::from(responses)));

        let recorded = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let (status, body) = script.lock().unwrap().pop_front().unwrap_or((200, "{}"));
                let recorded = recorded.clone();
                tokio::spawn(serve_one(stream, status, body, recorded));
            }
        });

        FakeServer { base_url, requests }
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn client(&self) -> ApiClient {
        ApiClient::new(&ApiSettings {
            base_url: self.base_url.clone(),
            token: Some("tkn".into()),
            timeout_secs: 5,
        })
        .unwrap()
    }
}

/// Reads one request, records it, then writes the scripted response.
async fn serve_one(
    mut stream: TcpStream,
    status: u16,
    body: &'static str,
    recorded: Arc<Mutex<Vec<Recorded>>>,
) -> Option<()> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().ok()?,
                "authorization" => authorization = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    while raw.len() < header_end + content_length {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
    }
    recorded.lock().unwrap().push(Recorded {
        method,
        path,
        authorization,
        body: String::from_utf8_lossy(&raw[header_end..]).to_string(),
    });

    let response = format!(
        "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await.ok()?;
    stream.shutdown().await.ok()
}

#[tokio::test]
async fn fetch_pending_posts_cursor_and_parses_records() {
    let server = FakeServer::start(vec![(
        200,
        r#"[{"entity":"player","entityId":"42","op":"upsert","data":{}}]"#,
    )])
    .await;

    let records = server.client().fetch_pending(1_700_000_000_000).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["entityId"], "42");

    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/api/sync/pending");
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer tkn"));
    let sent: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(sent, json!({"lastSync": 1_700_000_000_000i64}));
}

#[tokio::test]
async fn identical_pending_fetches_share_one_request() {
    let server = FakeServer::start(vec![
        (200, r#"[{"entity":"team","entityId":"3","op":"upsert","data":{}}]"#),
        (200, "[]"),
    ])
    .await;
    let client = server.client();

    let (a, b) = tokio::join!(client.fetch_pending(5_000), client.fetch_pending(5_000));
    assert_eq!(a.unwrap().len(), 1);
    assert_eq!(b.unwrap().len(), 1);
    assert_eq!(server.requests().len(), 1);
    assert_eq!(client.in_flight_reads(), 0);

    // A different cursor is a different request
    assert!(client.fetch_pending(6_000).await.unwrap().is_empty());
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn error_status_is_classified() {
    let server = FakeServer::start(vec![(503, "busy"), (400, "bad")]).await;
    let client = server.client();

    let unavailable = client
        .perform(OfflineAction::UpdateProfile, &json!({"name": "A"}))
        .await
        .unwrap_err();
    assert!(matches!(unavailable, SyncError::HttpStatus { status: 503, .. }));
    assert!(unavailable.is_retryable());

    let rejected = client
        .perform(OfflineAction::Sync, &json!({"op": 1}))
        .await
        .unwrap_err();
    assert!(matches!(rejected, SyncError::HttpStatus { status: 400, .. }));
    assert!(!rejected.is_retryable());

    let methods: Vec<_> = server
        .requests()
        .into_iter()
        .map(|r| format!("{} {}", r.method, r.path))
        .collect();
    assert!(methods.contains(&"PUT /api/profile".to_string()));
    assert!(methods.contains(&"POST /api/sync".to_string()));
}

#[tokio::test]
async fn queued_actions_replay_over_http() {
    let server = FakeServer::start(vec![(503, "busy")]).await;
    let api = Arc::new(server.client());

    let queue = OfflineQueue::open(Arc::new(MemoryQueue::new()), 3, Arc::new(NoOpEmitter))
        .await
        .unwrap();
    let handler = Arc::new(RestReplayHandler::new(api));
    for action in [OfflineAction::Sync, OfflineAction::UploadFile] {
        queue.register_handler(action, handler.clone());
    }

    let content = base64::engine::general_purpose::STANDARD.encode(b"crest-bytes");
    queue
        .enqueue(OfflineAction::Sync, json!({"matchId": "9", "note": "half time"}))
        .await
        .unwrap();
    queue
        .enqueue(
            OfflineAction::UploadFile,
            json!({"fileName": "crest.png", "contentType": "image/png", "contentBase64": content}),
        )
        .await
        .unwrap();

    let mut status = queue.status_changes();
    queue.set_online(true);
    status
        .wait_for(|s| s.pending == 0 && !s.is_draining)
        .await
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    let sync_posts = requests.iter().filter(|r| r.path == "/api/sync").count();
    assert_eq!(sync_posts, 2);

    let upload = requests.iter().find(|r| r.path == "/api/upload").unwrap();
    assert!(upload.body.contains("filename=\"crest.png\""));
    assert!(upload.body.contains("crest-bytes"));
}
