use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

// Just enough of the Redis protocol for the commands the queue client and a
// Bull-style processor issue.
pub struct FakeRedis {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    store: Mutex<Store>,
    accepted: AtomicUsize,
    connections: Mutex<Vec<AbortHandle>>,
}

#[derive(Default)]
struct Store {
    counters: HashMap<String, i64>,
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
    zsets: HashMap<String, Vec<(String, f64)>>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

enum Reply {
    Status(&'static str),
    Error(String),
    Int(i64),
    Bulk(Option<String>),
    Array(Vec<Reply>),
}

impl Reply {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Status(s) => out.extend_from_slice(format!("+{s}\r\n").as_bytes()),
            Self::Error(e) => out.extend_from_slice(format!("-{e}\r\n").as_bytes()),
            Self::Int(n) => out.extend_from_slice(format!(":{n}\r\n").as_bytes()),
            Self::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            Self::Bulk(Some(s)) => {
                out.extend_from_slice(format!("${}\r\n", s.len()).as_bytes());
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Self::Array(items) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    fn bulk(s: impl Into<String>) -> Self {
        Self::Bulk(Some(s.into()))
    }
}

impl FakeRedis {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake redis");
        let addr = listener.local_addr().expect("local addr");
        let shared = Arc::new(Shared::default());

        let accept_shared = shared.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                let handles = serve(accept_shared.clone(), socket);
                accept_shared
                    .connections
                    .lock()
                    .expect("connections lock")
                    .extend(handles);
            }
        });

        Self {
            addr,
            shared,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    // Closes every open client socket while the listener keeps accepting.
    pub fn drop_connections(&self) {
        let mut connections = self.shared.connections.lock().expect("connections lock");
        for handle in connections.drain(..) {
            handle.abort();
        }
        self.shared
            .store
            .lock()
            .expect("store lock")
            .subscribers
            .clear();
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}

fn serve(shared: Arc<Shared>, socket: TcpStream) -> [AbortHandle; 2] {
    let (read_half, mut write_half) = socket.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer = tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let reader = tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        let mut multi: Option<Vec<Vec<String>>> = None;
        let mut subscriptions = 0;
        while let Ok(Some(args)) = read_command(&mut reader).await {
            let name = args[0].to_ascii_uppercase();
            let reply = match name.as_str() {
                "SUBSCRIBE" => {
                    for channel in &args[1..] {
                        subscriptions += 1;
                        shared
                            .store
                            .lock()
                            .expect("store lock")
                            .subscribers
                            .entry(channel.clone())
                            .or_default()
                            .push(out_tx.clone());
                        let confirm = Reply::Array(vec![
                            Reply::bulk("subscribe"),
                            Reply::bulk(channel.clone()),
                            Reply::Int(subscriptions),
                        ]);
                        let _ = out_tx.send(confirm.bytes());
                    }
                    continue;
                }
                "MULTI" => {
                    multi = Some(Vec::new());
                    Reply::Status("OK")
                }
                "EXEC" => match multi.take() {
                    Some(queued) => {
                        let mut store = shared.store.lock().expect("store lock");
                        Reply::Array(queued.iter().map(|cmd| store.execute(cmd)).collect())
                    }
                    None => Reply::Error("ERR EXEC without MULTI".to_string()),
                },
                _ => match multi.as_mut() {
                    Some(queued) => {
                        queued.push(args);
                        Reply::Status("QUEUED")
                    }
                    None => shared.store.lock().expect("store lock").execute(&args),
                },
            };
            if out_tx.send(reply.bytes()).is_err() {
                break;
            }
        }
    });

    [writer.abort_handle(), reader.abort_handle()]
}

async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<String>>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let count = parse_header(&line, '*')?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len = parse_header(&line, '$')?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await?;
        buf.truncate(len);
        args.push(String::from_utf8_lossy(&buf).into_owned());
    }
    if args.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty command"));
    }
    Ok(Some(args))
}

fn parse_header(line: &str, marker: char) -> io::Result<usize> {
    line.trim_end()
        .strip_prefix(marker)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("bad header {line:?}")))
}

impl Store {
    fn execute(&mut self, args: &[String]) -> Reply {
        let name = args[0].to_ascii_uppercase();
        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
        match name.as_str() {
            "PING" => Reply::Status("PONG"),
            "CLIENT" | "SELECT" => Reply::Status("OK"),
            "INCR" | "INCRBY" => {
                let by = if name == "INCR" {
                    1
                } else {
                    arg(2).parse().unwrap_or(1)
                };
                let counter = self.counters.entry(arg(1)).or_default();
                *counter += by;
                Reply::Int(*counter)
            }
            "HSET" | "HMSET" => {
                let hash = self.hashes.entry(arg(1)).or_default();
                let mut added = 0;
                for pair in args[2..].chunks(2) {
                    if let [field, value] = pair {
                        if hash.insert(field.clone(), value.clone()).is_none() {
                            added += 1;
                        }
                    }
                }
                if name == "HSET" {
                    Reply::Int(added)
                } else {
                    Reply::Status("OK")
                }
            }
            "HGETALL" => Reply::Array(
                self.hashes
                    .get(&arg(1))
                    .map(|hash| {
                        hash.iter()
                            .flat_map(|(k, v)| [Reply::bulk(k.clone()), Reply::bulk(v.clone())])
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
            "LPUSH" => {
                let list = self.lists.entry(arg(1)).or_default();
                for value in &args[2..] {
                    list.push_front(value.clone());
                }
                Reply::Int(list.len() as i64)
            }
            "LREM" => {
                let list = self.lists.entry(arg(1)).or_default();
                let before = list.len();
                let target = arg(3);
                list.retain(|v| *v != target);
                Reply::Int((before - list.len()) as i64)
            }
            "LPOS" => match self
                .lists
                .get(&arg(1))
                .and_then(|list| list.iter().position(|v| *v == arg(2)))
            {
                Some(index) => Reply::Int(index as i64),
                None => Reply::Bulk(None),
            },
            "ZADD" => {
                let zset = self.zsets.entry(arg(1)).or_default();
                let score: f64 = arg(2).parse().unwrap_or_default();
                let member = arg(3);
                let added = !zset.iter().any(|(m, _)| *m == member);
                zset.retain(|(m, _)| *m != member);
                zset.push((member, score));
                Reply::Int(i64::from(added))
            }
            "ZREM" => {
                let zset = self.zsets.entry(arg(1)).or_default();
                let before = zset.len();
                let member = arg(2);
                zset.retain(|(m, _)| *m != member);
                Reply::Int((before - zset.len()) as i64)
            }
            "ZSCORE" => Reply::Bulk(
                self.zsets
                    .get(&arg(1))
                    .and_then(|zset| zset.iter().find(|(m, _)| *m == arg(2)))
                    .map(|(_, score)| score.to_string()),
            ),
            "ZRANGE" => {
                let mut members = self.zsets.get(&arg(1)).cloned().unwrap_or_default();
                members.sort_by(|a, b| a.1.total_cmp(&b.1));
                Reply::Array(members.into_iter().map(|(m, _)| Reply::bulk(m)).collect())
            }
            "PUBLISH" => {
                let message = Reply::Array(vec![
                    Reply::bulk("message"),
                    Reply::bulk(arg(1)),
                    Reply::bulk(arg(2)),
                ])
                .bytes();
                let subscribers = self.subscribers.entry(arg(1)).or_default();
                subscribers.retain(|tx| tx.send(message.clone()).is_ok());
                Reply::Int(subscribers.len() as i64)
            }
            other => Reply::Error(format!("ERR unknown command '{other}'")),
        }
    }
}

// Moves jobs between the Bull collections and announces each move the way a
// Bull worker does.
pub struct BullProcessor {
    conn: MultiplexedConnection,
    queue_key: String,
}

impl BullProcessor {
    pub async fn connect(url: &str, queue_key: &str) -> Self {
        let conn = redis::Client::open(url)
            .expect("client")
            .get_multiplexed_async_connection()
            .await
            .expect("processor connection");
        Self {
            conn,
            queue_key: queue_key.to_string(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.queue_key)
    }

    pub async fn activate(&mut self, job_id: &str) {
        let _: i64 = self.conn.lrem(self.key("wait"), 0, job_id).await.expect("lrem");
        let _: i64 = self.conn.lpush(self.key("active"), job_id).await.expect("lpush");
        let _: i64 = self.conn.hset(self.key(job_id), "processedOn", 1).await.expect("hset");
        let _: i64 = self.conn.publish(self.key("active"), job_id).await.expect("publish");
    }

    pub async fn complete(&mut self, job_id: &str, return_value: Value) {
        let _: i64 = self.conn.lrem(self.key("active"), 0, job_id).await.expect("lrem");
        let _: i64 = self
            .conn
            .hset(self.key(job_id), "returnvalue", return_value.to_string())
            .await
            .expect("hset");
        let _: i64 = self.conn.zadd(self.key("completed"), job_id, 1).await.expect("zadd");
        let message = json!({ "jobId": job_id, "val": return_value }).to_string();
        let _: i64 = self.conn.publish(self.key("completed"), message).await.expect("publish");
    }

    pub async fn fail(&mut self, job_id: &str, reason: &str) {
        let _: i64 = self.conn.lrem(self.key("active"), 0, job_id).await.expect("lrem");
        let _: i64 = self
            .conn
            .hset(self.key(job_id), "failedReason", reason)
            .await
            .expect("hset");
        let _: i64 = self.conn.zadd(self.key("failed"), job_id, 1).await.expect("zadd");
        let message = json!({ "jobId": job_id, "val": reason }).to_string();
        let _: i64 = self.conn.publish(self.key("failed"), message).await.expect("publish");
    }
}
