//! Wire-level tests against a live server on a loopback port

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use stratum_pool::config::Config;
use stratum_pool::core::{PowAlgorithm, Target};
use stratum_pool::stratum::{
    run_job_feed, JobPublisher, JobTemplate, StratumServer, StratumService, MAX_LINE_LENGTH,
};
use stratum_pool::utils::PoolMetrics;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Pool {
    addr: std::net::SocketAddr,
    publisher: JobPublisher,
    metrics: Arc<PoolMetrics>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn start_pool() -> Pool {
    let mut config = Config::default();
    config.stratum.initial_difficulty = 1e-10;
    let metrics = Arc::new(PoolMetrics::new());
    let service = StratumService::new(
        &config,
        StratumService::registry_from_config(&config),
        Arc::clone(&metrics),
    );
    let server = Arc::new(StratumServer::new(&config, Arc::new(service)));
    let publisher = server.publisher();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    Pool {
        addr,
        publisher,
        metrics,
        shutdown: Some(tx),
    }
}

fn template(height: u64) -> JobTemplate {
    JobTemplate {
        height,
        previous_block_hash: format!("{:064x}", height),
        coinbase1: "0100000001".to_string(),
        coinbase2: "ffffffff00".to_string(),
        transactions: vec!["11".repeat(32)],
        version: 0x2000_0000,
        bits: "1d00ffff".to_string(),
        time: 1_600_000_000,
        target: Some(Target::from_bytes([0; 32]).to_hex()),
        pow: PowAlgorithm::Sha256d,
        clean_jobs: true,
    }
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(pool: &Pool) -> Self {
        let stream = TcpStream::connect(pool.addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, msg: Value) {
        let line = msg.to_string() + "\n";
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for the server")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }

    async fn call(&mut self, id: u64, method: &str, params: Value) -> Value {
        self.send(json!({"id": id, "method": method, "params": params})).await;
        let resp = self.recv().await;
        assert_eq!(resp["id"], id);
        resp
    }
}

#[tokio::test]
async fn test_subscribe_authorize_submit() {
    let pool = start_pool().await;
    let first = pool.publisher.publish(template(100)).unwrap();

    let mut client = Client::connect(&pool).await;

    let resp = client.call(1, "mining.subscribe", json!(["cgminer/4.11"])).await;
    assert!(resp["error"].is_null());
    let extranonce1 = resp["result"][1].as_str().unwrap().to_string();
    assert_eq!(extranonce1.len(), 8);
    assert_eq!(resp["result"][2], 4);

    let resp = client.call(2, "mining.authorize", json!(["alice.rig", "x"])).await;
    assert_eq!(resp["result"], true);

    let msg = client.recv().await;
    assert_eq!(msg["method"], "mining.set_difficulty");
    assert!(msg["id"].is_null());

    let notify = client.recv().await;
    assert_eq!(notify["method"], "mining.notify");
    let params = notify["params"].as_array().unwrap();
    assert_eq!(params.len(), 9);
    assert_eq!(params[0], first.id.as_str());
    assert_eq!(params[4].as_array().unwrap().len(), 1);
    assert_eq!(params[8], true);
    let ntime = params[7].as_str().unwrap().to_string();

    let share = json!(["alice.rig", first.id.as_str(), "00000000", ntime, "00000001"]);
    let resp = client.call(3, "mining.submit", share.clone()).await;
    assert_eq!(resp["result"], true);
    assert!(resp["error"].is_null());

    let resp = client.call(4, "mining.submit", share).await;
    assert_eq!(resp["result"], false);
    assert_eq!(resp["error"][0], 22);

    // New work is pushed and the old job goes stale
    let second = pool.publisher.publish(template(101)).unwrap();
    let notify = client.recv().await;
    assert_eq!(notify["method"], "mining.notify");
    assert_eq!(notify["params"][0], second.id.as_str());

    let resp = client
        .call(5, "mining.submit", json!(["alice.rig", first.id.as_str(), "00000000", ntime, "00000002"]))
        .await;
    assert_eq!(resp["error"][0], 21);

    let snapshot = pool.metrics.snapshot();
    assert_eq!(snapshot.shares_accepted, 1);
    assert_eq!(snapshot.shares_rejected, 2);
    assert_eq!(snapshot.connections_open, 1);
}

#[tokio::test]
async fn test_protocol_errors_keep_connection() {
    let pool = start_pool().await;
    let mut client = Client::connect(&pool).await;

    let resp = client.call(1, "mining.authorize", json!(["alice", "x"])).await;
    assert_eq!(resp["error"][0], 25);

    let resp = client.call(2, "mining.submit", json!(["alice", "0", "00", "00", "00"])).await;
    assert_eq!(resp["result"], false);
    assert_eq!(resp["error"][0], 24);

    let resp = client.call(3, "mining.extranonce.subscribe", json!([])).await;
    assert_eq!(resp["result"], true);

    let resp = client.call(4, "mining.suggest_target", json!([])).await;
    assert_eq!(resp["error"][0], 20);

    client.call(5, "mining.subscribe", json!([])).await;
    let resp = client.call(6, "mining.subscribe", json!([])).await;
    assert_eq!(resp["error"][0], 20);
}

async fn assert_closed(client: &mut Client) {
    let read = timeout(WAIT, async {
        let mut rest = Vec::new();
        client.lines.get_mut().read_to_end(&mut rest).await
    })
    .await
    .expect("connection left open");
    // A reset is as good as an orderly close here
    if let Ok(n) = read {
        assert_eq!(n, 0);
    }
}

#[tokio::test]
async fn test_bad_json_closes_connection() {
    let pool = start_pool().await;
    let mut client = Client::connect(&pool).await;

    client.writer.write_all(b"{not json\n").await.unwrap();
    assert_closed(&mut client).await;

    // The server keeps serving others
    let mut other = Client::connect(&pool).await;
    let resp = other.call(1, "mining.subscribe", json!([])).await;
    assert!(resp["error"].is_null());
}

#[tokio::test]
async fn test_oversized_line_closes_connection() {
    let pool = start_pool().await;
    let mut client = Client::connect(&pool).await;

    let huge = format!(
        "{{\"id\":1,\"method\":\"mining.subscribe\",\"params\":[\"{}\"]}}\n",
        "a".repeat(MAX_LINE_LENGTH)
    );
    let _ = client.writer.write_all(huge.as_bytes()).await;
    assert_closed(&mut client).await;
}

#[tokio::test]
async fn test_session_resume_after_reconnect() {
    let pool = start_pool().await;

    let mut client = Client::connect(&pool).await;
    let resp = client.call(1, "mining.subscribe", json!([])).await;
    let session_id = resp["result"][0][1][1].as_str().unwrap().to_string();
    let extranonce1 = resp["result"][1].as_str().unwrap().to_string();
    drop(client);

    // The disconnect is processed asynchronously
    let mut resumed = None;
    for _ in 0..50 {
        let mut client = Client::connect(&pool).await;
        let resp = client
            .call(1, "mining.subscribe", json!(["cgminer/4.11", session_id]))
            .await;
        if resp["result"][1] == extranonce1.as_str() {
            resumed = Some(resp);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let resp = resumed.expect("session was not resumed");
    assert_eq!(resp["result"][0][1][1], session_id.as_str());
}

#[tokio::test]
async fn test_job_feed_publishes_lines() {
    let pool = start_pool().await;
    let mut client = Client::connect(&pool).await;
    client.call(1, "mining.subscribe", json!([])).await;
    client.call(2, "mining.authorize", json!(["alice", ""])).await;
    assert_eq!(client.recv().await["method"], "mining.set_difficulty");

    let input = format!(
        "{}\nnot a template\n\n{}\n",
        serde_json::to_string(&template(7)).unwrap(),
        serde_json::to_string(&template(8)).unwrap()
    );
    let published = run_job_feed(input.as_bytes(), pool.publisher.clone())
        .await
        .unwrap();
    assert_eq!(published, 2);

    let first = client.recv().await;
    let second = client.recv().await;
    assert_eq!(first["method"], "mining.notify");
    assert_eq!(second["method"], "mining.notify");
    assert_ne!(first["params"][0], second["params"][0]);
}
