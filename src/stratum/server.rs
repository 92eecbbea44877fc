//! TCP front end for the pool
//!
//! Each connection runs in its own task and owns its [`MinerSession`]. New
//! jobs fan out over a broadcast channel; a housekeeping task evicts expired
//! jobs and reclaims cooled extranonces.

use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobRegistry, JobTemplate};
use super::protocol::{StratumMessage, StratumMethod, StratumNotification};
use super::service::StratumService;
use super::session::MinerSession;
use crate::config::Config;
use crate::error::{Error, Result};

/// Longest accepted request line, newline included
pub const MAX_LINE_LENGTH: usize = 16 * 1024;

const JOB_CHANNEL_CAPACITY: usize = 64;

/// Publishes jobs into the registry and notifies connected miners
#[derive(Debug, Clone)]
pub struct JobPublisher {
    jobs: Arc<JobRegistry>,
    tx: broadcast::Sender<Arc<Job>>,
}

impl JobPublisher {
    /// Register a template as the current job and broadcast it
    pub fn publish(&self, template: JobTemplate) -> Result<Arc<Job>> {
        let job = self.jobs.publish_template(template)?;
        info!(
            job_id = %job.id,
            height = job.height,
            clean = job.clean_jobs,
            "New job"
        );
        // No receivers just means no miners yet
        let _ = self.tx.send(Arc::clone(&job));
        Ok(job)
    }

    /// Subscribe to job announcements
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Job>> {
        self.tx.subscribe()
    }
}

/// Read newline-delimited [`JobTemplate`] JSON and publish each one
///
/// Malformed lines are logged and skipped. Returns the number of jobs
/// published once the input ends.
pub async fn run_job_feed<R>(input: R, publisher: JobPublisher) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut published = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let template = match serde_json::from_str::<JobTemplate>(line) {
            Ok(template) => template,
            Err(e) => {
                warn!(error = %e, "Skipping malformed job template");
                continue;
            }
        };
        match publisher.publish(template) {
            Ok(_) => published += 1,
            Err(e) => warn!(error = %e, "Rejected job template"),
        }
    }

    info!(published, "Job feed ended");
    Ok(published)
}

/// Stratum server
pub struct StratumServer {
    host: String,
    port: u16,
    max_connections: usize,
    eviction_interval: Duration,
    service: Arc<StratumService>,
    job_tx: broadcast::Sender<Arc<Job>>,
    connections: Arc<DashMap<u64, SocketAddr>>,
    connection_counter: AtomicU64,
}

impl StratumServer {
    /// Create a server around a service
    pub fn new(config: &Config, service: Arc<StratumService>) -> Self {
        info!(
            "Initializing Stratum server on {}:{}",
            config.server.host, config.server.port
        );
        let (job_tx, _) = broadcast::channel(JOB_CHANNEL_CAPACITY);

        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            max_connections: config.server.max_connections,
            eviction_interval: config.jobs.eviction_interval(),
            service,
            job_tx,
            connections: Arc::new(DashMap::new()),
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Handle for feeding jobs to this server
    pub fn publisher(&self) -> JobPublisher {
        JobPublisher {
            jobs: Arc::clone(self.service.jobs()),
            tx: self.job_tx.clone(),
        }
    }

    /// The shared service
    pub fn service(&self) -> &Arc<StratumService> {
        &self.service
    }

    /// Open connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Bind the configured address and serve until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::config(format!("Failed to bind to {}: {}", addr, e)))?;

        info!("Stratum server listening on {}", addr);

        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Accept connections on `listener` until `shutdown` completes
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let housekeeping = self.start_housekeeping();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            continue;
                        }
                    };

                    if self.connections.len() >= self.max_connections {
                        warn!("Max connections reached, rejecting {}", addr);
                        continue;
                    }

                    let conn_id = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                    self.connections.insert(conn_id, addr);
                    let connections = Arc::clone(&self.connections);
                    let service = Arc::clone(&self.service);
                    let job_rx = self.job_tx.subscribe();

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, addr, service, job_rx).await {
                            debug!("Client {} error: {}", addr, e);
                        }
                        connections.remove(&conn_id);
                    });
                }
                _ = &mut shutdown => {
                    info!("Shutting down Stratum server");
                    break;
                }
            }
        }

        housekeeping.abort();
        self.service.metrics().log_summary();
        Ok(())
    }

    fn start_housekeeping(&self) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let period = self.eviction_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut ticks: u64 = 0;

            loop {
                ticker.tick().await;
                service.housekeeping();

                ticks += 1;
                if ticks % 30 == 0 {
                    service.metrics().log_summary();
                }
            }
        })
    }
}

impl std::fmt::Debug for StratumServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StratumServer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connections", &self.connections.len())
            .finish()
    }
}

/// Read request lines off the socket
///
/// Ends after EOF, a read error or an oversized line. Lines are forwarded
/// through a channel so the connection loop never cancels a partial read.
async fn read_lines(reader: OwnedReadHalf, tx: mpsc::Sender<Result<String>>) {
    let mut reader = BufReader::new(reader);

    loop {
        let mut line = String::new();
        let limit = (MAX_LINE_LENGTH + 1) as u64;
        let item = match (&mut reader).take(limit).read_line(&mut line).await {
            Ok(0) => return,
            Ok(n) if n > MAX_LINE_LENGTH => {
                Err(Error::protocol(format!("Request line exceeds {} bytes", MAX_LINE_LENGTH)))
            }
            Ok(_) => Ok(line),
            Err(e) => Err(e.into()),
        };

        let fatal = item.is_err();
        if tx.send(item).await.is_err() || fatal {
            return;
        }
    }
}

async fn write_json<T: serde::Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
    let json = serde_json::to_string(msg)? + "\n";
    writer.write_all(json.as_bytes()).await?;
    Ok(())
}

async fn send_job(writer: &mut OwnedWriteHalf, job: &Job) -> Result<()> {
    write_json(writer, &StratumNotification::notify(job.to_notify_params())).await
}

/// Handle a client connection
async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    service: Arc<StratumService>,
    mut job_rx: broadcast::Receiver<Arc<Job>>,
) -> Result<()> {
    info!("New connection from {}", addr);
    service.metrics().record_connection_opened();

    let mut session = match service.open_session() {
        Ok(session) => session,
        Err(e) => {
            service.metrics().record_connection_closed();
            return Err(e);
        }
    };

    let (reader, mut writer) = stream.into_split();
    let (line_tx, mut line_rx) = mpsc::channel(16);
    let reader_task = tokio::spawn(read_lines(reader, line_tx));

    let outcome = serve_session(&service, &mut session, &mut writer, &mut line_rx, &mut job_rx).await;

    reader_task.abort();
    info!(session = %session.id(), "Client {} disconnected", addr);
    service.close_session(session);
    service.metrics().record_connection_closed();
    outcome
}

async fn serve_session(
    service: &StratumService,
    session: &mut MinerSession,
    writer: &mut OwnedWriteHalf,
    lines: &mut mpsc::Receiver<Result<String>>,
    job_rx: &mut broadcast::Receiver<Arc<Job>>,
) -> Result<()> {
    let mut jobs_open = true;

    loop {
        tokio::select! {
            line = lines.recv() => {
                let line = match line {
                    Some(line) => line?,
                    None => return Ok(()),
                };
                if line.trim().is_empty() {
                    continue;
                }

                // Unparsable input ends the connection
                let req = match StratumMessage::from_json(&line)? {
                    StratumMessage::Request(req) => req,
                    _ => {
                        warn!(session = %session.id(), "Ignoring non-request message");
                        continue;
                    }
                };

                let method = req.method_enum();
                let response = service.handle_request(session, &req).await;
                write_json(writer, &response).await?;

                if method == StratumMethod::Authorize && response.result == Some(Value::Bool(true)) {
                    on_authorized(service, session, writer).await?;
                }
            }

            job = job_rx.recv(), if jobs_open => {
                let job = match job {
                    Ok(job) => job,
                    Err(RecvError::Lagged(missed)) => {
                        debug!(session = %session.id(), missed, "Job broadcast lagged");
                        match service.jobs().current() {
                            Some(job) => job,
                            None => continue,
                        }
                    }
                    Err(RecvError::Closed) => {
                        jobs_open = false;
                        continue;
                    }
                };

                session.prune_ledger(&service.jobs().snapshot());
                if session.is_authorized() {
                    send_job(writer, &job).await?;
                }
            }
        }
    }
}

/// Difficulty and current work for a freshly authorized miner
async fn on_authorized(
    service: &StratumService,
    session: &MinerSession,
    writer: &mut OwnedWriteHalf,
) -> Result<()> {
    write_json(writer, &StratumNotification::set_difficulty(session.difficulty())).await?;
    if let Some(job) = service.jobs().current() {
        send_job(writer, &job).await?;
    }
    Ok(())
}
