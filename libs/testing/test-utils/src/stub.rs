//! In-process stand-in for Redis
//!
//! Speaks just enough RESP2 for connection setup and the queue's empty-queue
//! paths: `PING`, `LLEN`/`ZCARD` (always 0), script calls (always 0) and
//! `BLPOP`/`BLMOVE`, which hold the connection for their block time and then
//! reply nil the way Redis does. Everything else gets `+OK`.
//!
//! Useful for testing client-side timeout handling without Docker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A stub Redis server on a random local port
///
/// The accept loop is aborted when this struct is dropped.
pub struct StubRedis {
    addr: String,
    connections: Arc<AtomicUsize>,
    accept: JoinHandle<()>,
}

impl StubRedis {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stub Redis");
        let addr = listener
            .local_addr()
            .expect("Failed to read stub Redis address")
            .to_string();
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = connections.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream));
            }
        });

        tracing::debug!(addr = %addr, "Stub Redis listening");
        Self {
            addr,
            connections,
            accept,
        }
    }

    /// `redis://` URL for this server
    pub fn connection_string(&self) -> String {
        format!("redis://{}", self.addr)
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for StubRedis {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(stream: TcpStream) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    while let Some(command) = read_command(&mut reader).await {
        let name = command
            .first()
            .map(|arg| arg.to_ascii_uppercase())
            .unwrap_or_default();

        let reply: &[u8] = match name.as_str() {
            "PING" => b"+PONG\r\n",
            "LLEN" | "ZCARD" | "EVALSHA" | "EVAL" => b":0\r\n",
            "BLPOP" | "BLMOVE" => {
                block_for(command.last()).await;
                if name == "BLPOP" { b"*-1\r\n" } else { b"$-1\r\n" }
            }
            _ => b"+OK\r\n",
        };

        if write.write_all(reply).await.is_err() {
            break;
        }
    }
}

/// Sleep like a blocking command with the given timeout argument; 0 never returns.
async fn block_for(timeout: Option<&String>) {
    let secs: f64 = timeout.and_then(|t| t.parse().ok()).unwrap_or(0.0);
    if secs <= 0.0 {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

/// Read one RESP array of bulk strings.
async fn read_command<R>(reader: &mut BufReader<R>) -> Option<Vec<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let count: usize = read_header(reader, b'*').await?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len: usize = read_header(reader, b'$').await?;
        let mut bulk = vec![0u8; len + 2];
        reader.read_exact(&mut bulk).await.ok()?;
        bulk.truncate(len);
        args.push(String::from_utf8_lossy(&bulk).into_owned());
    }
    Some(args)
}

async fn read_header<R>(reader: &mut BufReader<R>, prefix: u8) -> Option<usize>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let line = line.trim_end();
    if line.as_bytes().first() != Some(&prefix) {
        return None;
    }
    line[1..].parse().ok()
}
