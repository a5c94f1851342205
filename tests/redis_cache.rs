//! `RedisCache` against an in-test RESP server.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tower::ServiceExt;

use llm_inference_service::{
    AppConfig, AppState, ModelRegistry, RedisCache, ResponseCache, ServiceError, TextGenerator,
    build_router,
    cache::{CacheError, CachedGeneration},
    model::{Generation, ModelMetadata, SamplingParams},
};

const COMMAND_TIMEOUT: Duration = Duration::from_millis(200);

/// value, SETEX lifetime in seconds
type Store = Arc<Mutex<HashMap<String, (String, u64)>>>;

/// Minimal RESP2 server. Understands PING, GET and SETEX, acknowledges
/// anything else, and can be told to stop answering while still reading.
struct FakeRedis {
    addr: SocketAddr,
    silent: Arc<AtomicBool>,
    store: Store,
}

impl FakeRedis {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = Arc::new(AtomicBool::new(false));
        let store: Store = Arc::default();

        let (accept_silent, accept_store) = (silent.clone(), store.clone());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, accept_silent.clone(), accept_store.clone()));
            }
        });

        Self {
            addr,
            silent,
            store,
        }
    }

    fn url(&self) -> String {
        format!("redis://{}/", self.addr)
    }

    fn go_silent(&self) {
        self.silent.store(true, Ordering::SeqCst);
    }

    fn stored(&self, key: &str) -> Option<(String, u64)> {
        self.store.lock().unwrap().get(key).cloned()
    }
}

async fn serve(socket: TcpStream, silent: Arc<AtomicBool>, store: Store) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);
    while let Some(args) = read_command(&mut reader).await {
        if silent.load(Ordering::SeqCst) {
            continue;
        }
        let reply = respond(&args, &store);
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn read_command<R>(reader: &mut BufReader<R>) -> Option<Vec<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0u8; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        args.push(String::from_utf8(buf).ok()?);
    }
    Some(args)
}

fn respond(args: &[String], store: &Store) -> String {
    let command = args.first().map(|c| c.to_uppercase()).unwrap_or_default();
    match command.as_str() {
        "PING" => "+PONG\r\n".to_string(),
        "GET" => match store.lock().unwrap().get(&args[1]) {
            Some((value, _)) => format!("${}\r\n{}\r\n", value.len(), value),
            None => "$-1\r\n".to_string(),
        },
        "SETEX" => {
            let seconds = args[2].parse().unwrap();
            store
                .lock()
                .unwrap()
                .insert(args[1].clone(), (args[3].clone(), seconds));
            "+OK\r\n".to_string()
        }
        _ => "+OK\r\n".to_string(),
    }
}

fn entry() -> CachedGeneration {
    CachedGeneration {
        prompt: "Hello".into(),
        generated_text: "there, friend".into(),
        device_used: "cuda:0".into(),
        tokens_generated: 3,
    }
}

#[tokio::test]
async fn stores_and_reads_back_json_payloads() {
    let server = FakeRedis::start().await;
    let cache = RedisCache::connect(&server.url(), COMMAND_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(cache.backend(), "redis");

    assert_eq!(cache.get("llm:missing").await.unwrap(), None);

    cache
        .put("llm:abc", &entry(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(cache.get("llm:abc").await.unwrap(), Some(entry()));

    let (payload, seconds) = server.stored("llm:abc").unwrap();
    assert_eq!(seconds, 3600);
    let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(json["generated_text"], "there, friend");
    assert_eq!(json["tokens_generated"], 3);
}

#[tokio::test]
async fn zero_ttl_is_stored_for_one_second() {
    let server = FakeRedis::start().await;
    let cache = RedisCache::connect(&server.url(), COMMAND_TIMEOUT)
        .await
        .unwrap();

    cache.put("llm:short", &entry(), Duration::ZERO).await.unwrap();
    assert_eq!(server.stored("llm:short").unwrap().1, 1);
}

#[tokio::test]
async fn corrupt_payload_is_a_cache_error() {
    let server = FakeRedis::start().await;
    let cache = RedisCache::connect(&server.url(), COMMAND_TIMEOUT)
        .await
        .unwrap();
    server
        .store
        .lock()
        .unwrap()
        .insert("llm:bad".into(), ("not json".into(), 60));

    let err = cache.get("llm:bad").await.unwrap_err();
    assert!(matches!(err, CacheError::Payload(_)));
}

#[tokio::test]
async fn stalled_store_fails_commands_within_timeout() {
    let server = FakeRedis::start().await;
    let cache = RedisCache::connect(&server.url(), COMMAND_TIMEOUT)
        .await
        .unwrap();
    server.go_silent();

    let started = Instant::now();
    let read = tokio::time::timeout(Duration::from_secs(5), cache.get("llm:abc"))
        .await
        .expect("GET must be bounded by the command timeout");
    assert!(matches!(read, Err(CacheError::Backend(_))));

    let write = tokio::time::timeout(
        Duration::from_secs(5),
        cache.put("llm:abc", &entry(), Duration::from_secs(60)),
    )
    .await
    .expect("SETEX must be bounded by the command timeout");
    assert!(matches!(write, Err(CacheError::Backend(_))));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn store_that_never_answers_is_not_connected() {
    let server = FakeRedis::start().await;
    server.go_silent();

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        RedisCache::connect(&server.url(), COMMAND_TIMEOUT),
    )
    .await
    .expect("connect must give up on a silent store");
    assert!(result.is_err());
}

struct Fixed;

impl TextGenerator for Fixed {
    fn generate(&self, _: &str, _: &SamplingParams) -> Result<Generation, ServiceError> {
        Ok(Generation {
            text: "fresh output".into(),
            tokens_generated: 2,
        })
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            name: "fixed".into(),
            quantized: false,
            dtype: "float32".into(),
            size_bytes: 0,
            device: "cpu".into(),
        }
    }
}

#[tokio::test]
async fn generate_succeeds_while_store_is_stalled() {
    let server = FakeRedis::start().await;
    let cache: Arc<dyn ResponseCache> = Arc::new(
        RedisCache::connect(&server.url(), COMMAND_TIMEOUT)
            .await
            .unwrap(),
    );
    server.go_silent();

    let registry = Arc::new(ModelRegistry::with_generator(Arc::new(Fixed)));
    let state = AppState::new(Arc::new(AppConfig::default()), registry, Some(cache)).unwrap();
    let app = build_router(state);

    let request = Request::post("/generate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"prompt": "anyone there?"}"#))
        .unwrap();
    let response = tokio::time::timeout(Duration::from_secs(5), app.oneshot(request))
        .await
        .expect("generate must not wait on a stalled cache")
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["generated_text"], "fresh output");
    assert_eq!(body["cached"], false);
}
