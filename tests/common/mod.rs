//! In-process RESP server for integration tests.
//!
//! Speaks enough of Redis for the client to be exercised end to end:
//! AUTH/SELECT/CLIENT SETNAME, strings, SCAN, scripts, pub/sub with glob
//! patterns, and a `GARBAGE` command answered with undecodable bytes.
//! Every command received is logged so tests can assert on
//! wire traffic.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use plexis::core::client::script_digest;
use plexis::proto::codec::{Decoder, Encoder};
use plexis::{ConnectionConfig, RespValue};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

/// Bytes that can never start a RESP value.
pub const GARBAGE: &[u8] = b"!garbage\r\n";

enum Outgoing {
    Value(RespValue),
    Raw(&'static [u8]),
}

type Outbox = mpsc::UnboundedSender<Outgoing>;

#[derive(Default)]
struct PubSub {
    channels: HashSet<Bytes>,
    patterns: HashSet<Bytes>,
}

struct Session {
    outbox: Outbox,
    pubsub: PubSub,
    task: AbortHandle,
}

#[derive(Default)]
struct Shared {
    password: Option<String>,
    data: Mutex<HashMap<Bytes, Bytes>>,
    scripts: Mutex<HashMap<String, Bytes>>,
    log: Mutex<Vec<Vec<String>>>,
    sessions: Mutex<HashMap<u64, Session>>,
    accepted: AtomicUsize,
    next_id: AtomicU64,
}

/// A mock Redis listening on an ephemeral localhost port.
pub struct MockRedis {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

impl MockRedis {
    /// Starts a server that accepts every client.
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    /// Starts a server that requires `AUTH <password>` before anything else.
    pub async fn with_password(password: &str) -> Self {
        Self::spawn(Some(password.to_string())).await
    }

    async fn spawn(password: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared {
            password,
            ..Default::default()
        });

        let accept = {
            let shared = shared.clone();
            tokio::spawn(async move {
                loop {
                    let (socket, _) = match listener.accept().await {
                        Ok(s) => s,
                        Err(_) => break,
                    };
                    shared.accepted.fetch_add(1, Ordering::SeqCst);
                    start_session(shared.clone(), socket);
                }
            })
        };

        Self {
            addr,
            shared,
            accept,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// TCP config pointing at this server.
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::tcp("127.0.0.1", self.port())
    }

    /// Number of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Every logged command whose name matches, case-insensitively.
    pub fn commands(&self, name: &str) -> Vec<Vec<String>> {
        self.shared
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c[0].eq_ignore_ascii_case(name))
            .cloned()
            .collect()
    }

    /// The full command log.
    pub fn log(&self) -> Vec<Vec<String>> {
        self.shared.log.lock().unwrap().clone()
    }

    /// Channels plus patterns currently subscribed across all sessions.
    pub fn subscriptions(&self) -> usize {
        self.shared
            .sessions
            .lock()
            .unwrap()
            .values()
            .map(|s| s.pubsub.channels.len() + s.pubsub.patterns.len())
            .sum()
    }

    /// Drops every client connection, as a server restart would.
    pub fn disconnect_all(&self) {
        let sessions: Vec<Session> = self
            .shared
            .sessions
            .lock()
            .unwrap()
            .drain()
            .map(|(_, s)| s)
            .collect();
        for session in sessions {
            session.task.abort();
        }
    }

    /// Writes bytes no RESP decoder accepts to every client.
    pub fn corrupt_all(&self) {
        for session in self.shared.sessions.lock().unwrap().values() {
            let _ = session.outbox.send(Outgoing::Raw(GARBAGE));
        }
    }

    /// Publishes from the server side; returns the number of receivers.
    pub fn publish(&self, channel: &str, payload: &str) -> i64 {
        publish(
            &self.shared,
            Bytes::from(channel.to_string()),
            Bytes::from(payload.to_string()),
        )
    }
}

impl Drop for MockRedis {
    fn drop(&mut self) {
        self.accept.abort();
        self.disconnect_all();
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within 2s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Awaits `future`, failing the test after two seconds.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}

fn start_session(shared: Arc<Shared>, socket: TcpStream) {
    let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
    let (outbox, mut inbox) = mpsc::unbounded_channel::<Outgoing>();
    let (mut reader, mut writer) = socket.into_split();

    tokio::spawn(async move {
        let mut encoder = Encoder::new();
        while let Some(outgoing) = inbox.recv().await {
            let written = match outgoing {
                Outgoing::Value(value) => {
                    encoder.encode(&value);
                    writer.write_all(&encoder.take()).await
                }
                Outgoing::Raw(bytes) => writer.write_all(bytes).await,
            };
            if written.is_err() {
                return;
            }
        }
    });

    // Registered before the reader can run, so pub/sub commands find it.
    // Aborting the reader drops the last outbox, which ends the writer.
    let mut sessions = shared.sessions.lock().unwrap();
    let session_outbox = outbox.clone();
    let task = {
        let shared = shared.clone();
        tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let mut authed = shared.password.is_none();
            let mut buf = [0u8; 4096];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                decoder.append(&buf[..n]);
                while let Ok(Some(frame)) = decoder.decode() {
                    let args = command_args(frame);
                    // Answers with bytes that break the client's decoder.
                    if args.first().map_or(false, |a| a.eq_ignore_ascii_case(b"GARBAGE")) {
                        shared.log.lock().unwrap().push(vec!["GARBAGE".to_string()]);
                        let _ = outbox.send(Outgoing::Raw(GARBAGE));
                        continue;
                    }
                    for reply in handle(&shared, id, &mut authed, args) {
                        let _ = outbox.send(Outgoing::Value(reply));
                    }
                }
            }
            shared.sessions.lock().unwrap().remove(&id);
        })
    };
    sessions.insert(
        id,
        Session {
            outbox: session_outbox,
            pubsub: PubSub::default(),
            task: task.abort_handle(),
        },
    );
}

fn command_args(frame: RespValue) -> Vec<Bytes> {
    match frame {
        RespValue::Array(Some(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                RespValue::BulkString(Some(b)) => Some(b),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn text(b: &Bytes) -> String {
    String::from_utf8_lossy(b).into_owned()
}

fn err(message: &str) -> RespValue {
    RespValue::Error(message.to_string())
}

fn handle(shared: &Shared, id: u64, authed: &mut bool, args: Vec<Bytes>) -> Vec<RespValue> {
    if args.is_empty() {
        return vec![err("ERR empty command")];
    }
    shared
        .log
        .lock()
        .unwrap()
        .push(args.iter().map(text).collect());

    let name = text(&args[0]).to_ascii_uppercase();
    let argc = args.len();

    if name == "AUTH" {
        if argc < 2 {
            return vec![err("ERR wrong number of arguments for 'auth' command")];
        }
        let given = text(&args[argc - 1]);
        return match &shared.password {
            None => vec![err(
                "ERR AUTH <password> called without any password configured for the default user",
            )],
            Some(expected) if *expected == given => {
                *authed = true;
                vec![RespValue::status("OK")]
            }
            Some(_) => vec![err("WRONGPASS invalid username-password pair or user is disabled.")],
        };
    }
    if !*authed {
        return vec![err("NOAUTH Authentication required.")];
    }

    match (name.as_str(), argc) {
        ("PING", 1) => vec![RespValue::status("PONG")],
        // Never answers, like a blocking pop on an empty list.
        ("BLOCK", _) => Vec::new(),
        ("ECHO", 2) => vec![RespValue::bulk(args[1].clone())],
        ("SELECT", 2) => match text(&args[1]).parse::<u32>() {
            Ok(db) if db < 16 => vec![RespValue::status("OK")],
            _ => vec![err("ERR DB index is out of range")],
        },
        ("CLIENT", 3) => vec![RespValue::status("OK")],
        ("SET", 3) => {
            let mut data = shared.data.lock().unwrap();
            data.insert(args[1].clone(), args[2].clone());
            vec![RespValue::status("OK")]
        }
        ("GET", 2) => {
            let data = shared.data.lock().unwrap();
            vec![RespValue::BulkString(data.get(&args[1]).cloned())]
        }
        ("EXISTS", 2) => {
            let data = shared.data.lock().unwrap();
            vec![RespValue::Integer(data.contains_key(&args[1]) as i64)]
        }
        ("DEL", n) if n > 1 => {
            let mut data = shared.data.lock().unwrap();
            let removed = args[1..].iter().filter(|k| data.remove(*k).is_some()).count();
            vec![RespValue::Integer(removed as i64)]
        }
        ("INCR", 2) => {
            let mut data = shared.data.lock().unwrap();
            let current = data
                .get(&args[1])
                .map(|v| text(v).parse::<i64>())
                .unwrap_or(Ok(0));
            match current {
                Ok(n) => {
                    data.insert(args[1].clone(), Bytes::from((n + 1).to_string()));
                    vec![RespValue::Integer(n + 1)]
                }
                Err(_) => vec![err("ERR value is not an integer or out of range")],
            }
        }
        ("SCAN", _) => vec![scan(shared, &args)],
        ("SCRIPT", 3) if text(&args[1]).eq_ignore_ascii_case("LOAD") => {
            let digest = script_digest(&text(&args[2]));
            shared.scripts.lock().unwrap().insert(digest.clone(), args[2].clone());
            vec![RespValue::bulk(digest)]
        }
        ("SCRIPT", 2) if text(&args[1]).eq_ignore_ascii_case("FLUSH") => {
            shared.scripts.lock().unwrap().clear();
            vec![RespValue::status("OK")]
        }
        ("EVALSHA", n) if n >= 3 => match shared.scripts.lock().unwrap().get(&text(&args[1])) {
            Some(script) => vec![RespValue::bulk(script.clone())],
            None => vec![err("NOSCRIPT No matching script. Please use EVAL.")],
        },
        // Scripts echo their own source; EVAL also caches them by digest.
        ("EVAL", n) if n >= 3 => {
            let digest = script_digest(&text(&args[1]));
            shared.scripts.lock().unwrap().insert(digest, args[1].clone());
            vec![RespValue::bulk(args[1].clone())]
        }
        ("PUBLISH", 3) => vec![RespValue::Integer(publish(
            shared,
            args[1].clone(),
            args[2].clone(),
        ))],
        ("SUBSCRIBE", n) | ("PSUBSCRIBE", n) | ("UNSUBSCRIBE", n) | ("PUNSUBSCRIBE", n)
            if n > 1 =>
        {
            pubsub(shared, id, &name, &args[1..])
        }
        ("PING", _) | ("ECHO", _) | ("GET", _) | ("SET", _) | ("EXISTS", _) | ("INCR", _) => {
            vec![err(&format!(
                "ERR wrong number of arguments for '{}' command",
                name.to_ascii_lowercase()
            ))]
        }
        _ => vec![err(&format!("ERR unknown command '{}'", text(&args[0])))],
    }
}

fn scan(shared: &Shared, args: &[Bytes]) -> RespValue {
    let cursor: usize = text(&args[1]).parse().unwrap_or(0);
    let mut pattern = None;
    let mut count = 10usize;
    let mut i = 2;
    while i + 1 < args.len() {
        match text(&args[i]).to_ascii_uppercase().as_str() {
            "MATCH" => pattern = Some(args[i + 1].clone()),
            "COUNT" => count = text(&args[i + 1]).parse().unwrap_or(10),
            _ => {}
        }
        i += 2;
    }

    let mut keys: Vec<Bytes> = shared.data.lock().unwrap().keys().cloned().collect();
    keys.sort();

    let end = (cursor + count).min(keys.len());
    let page: Vec<RespValue> = keys[cursor.min(end)..end]
        .iter()
        .filter(|k| pattern.as_ref().map_or(true, |p| glob_match(p, k)))
        .cloned()
        .map(RespValue::bulk)
        .collect();
    let next = if end >= keys.len() { 0 } else { end };

    RespValue::array(vec![
        RespValue::bulk(next.to_string()),
        RespValue::array(page),
    ])
}

fn pubsub(shared: &Shared, id: u64, name: &str, keys: &[Bytes]) -> Vec<RespValue> {
    let mut sessions = shared.sessions.lock().unwrap();
    let Some(session) = sessions.get_mut(&id) else {
        return Vec::new();
    };
    let state = &mut session.pubsub;

    keys.iter()
        .map(|key| {
            match name {
                "SUBSCRIBE" => state.channels.insert(key.clone()),
                "PSUBSCRIBE" => state.patterns.insert(key.clone()),
                "UNSUBSCRIBE" => state.channels.remove(key),
                _ => state.patterns.remove(key),
            };
            let total = state.channels.len() + state.patterns.len();
            RespValue::array(vec![
                RespValue::bulk(name.to_ascii_lowercase()),
                RespValue::bulk(key.clone()),
                RespValue::Integer(total as i64),
            ])
        })
        .collect()
}

fn publish(shared: &Shared, channel: Bytes, payload: Bytes) -> i64 {
    let sessions = shared.sessions.lock().unwrap();
    let mut receivers = 0;
    for session in sessions.values() {
        if session.pubsub.channels.contains(&channel) {
            receivers += 1;
            let _ = session.outbox.send(Outgoing::Value(RespValue::array(vec![
                RespValue::bulk("message"),
                RespValue::bulk(channel.clone()),
                RespValue::bulk(payload.clone()),
            ])));
        }
        for pattern in &session.pubsub.patterns {
            if glob_match(pattern, &channel) {
                receivers += 1;
                let _ = session.outbox.send(Outgoing::Value(RespValue::array(vec![
                    RespValue::bulk("pmessage"),
                    RespValue::bulk(pattern.clone()),
                    RespValue::bulk(channel.clone()),
                    RespValue::bulk(payload.clone()),
                ])));
            }
        }
    }
    receivers
}

/// Glob matching with `*` and `?`, enough for pattern subscriptions.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}
