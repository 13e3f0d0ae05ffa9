use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use hotswap_core::HotswapConfig;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use crate::context::{ReloadSummary, ReloadTarget, RuntimeContext};
use crate::error::{io_err, RuntimeError};
use crate::manifest::{DocumentSet, ManifestSource};
use crate::paths::{run_dir, socket_path, HEARTBEAT_INTERVAL, HEARTBEAT_TIMER};
use crate::protocol::{ControlRequest, ControlResponse, ModuleReport, RuntimeStatus};
use crate::watcher::{self, SourceWatcher};

struct ReloadJob {
    target: ReloadTarget,
    source: &'static str,
    respond_to: oneshot::Sender<Result<ReloadSummary, String>>,
}

/// Reload counters reported by `status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadStats {
    pub reloads: u64,
    pub last_reload_at_unix: u64,
    pub last_target: Option<String>,
}

/// State shared by the runtime tasks.
pub struct Runtime {
    home: PathBuf,
    config: HotswapConfig,
    ctx: Arc<RuntimeContext>,
    source: Arc<ManifestSource>,
    documents: DocumentSet,
    stats: RwLock<ReloadStats>,
    started_at_unix: u64,
}

impl Runtime {
    /// Mount every document under the configured source root.
    pub async fn mount(home: PathBuf, config: HotswapConfig) -> Result<Self, RuntimeError> {
        let root = &config.source_root;
        if !root.exists() {
            fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
        }
        let resolver = config.resolver();
        let source = Arc::new(ManifestSource::new(resolver.clone()));
        let ctx = Arc::new(RuntimeContext::new(resolver, source.clone()));
        let documents = DocumentSet::mount(&ctx, &source).await?;

        Ok(Self {
            home,
            config,
            ctx,
            source,
            documents,
            stats: RwLock::new(ReloadStats::default()),
            started_at_unix: unix_seconds_now(),
        })
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    pub fn documents(&self) -> &DocumentSet {
        &self.documents
    }

    pub async fn status(&self) -> RuntimeStatus {
        let revisions: std::collections::HashMap<_, _> =
            self.documents.revisions().into_iter().collect();
        let modules = self
            .ctx
            .status()
            .into_iter()
            .map(|status| ModuleReport {
                revision: revisions.get(&status.id).copied(),
                status,
            })
            .collect();
        let stats = self.stats.read().await.clone();

        RuntimeStatus {
            running: true,
            started_at_unix: self.started_at_unix,
            reloads: stats.reloads,
            last_reload_at_unix: stats.last_reload_at_unix,
            last_target: stats.last_target,
            watching: self.config.enabled,
            full_reload_on_untracked: self.config.full_reload_on_untracked,
            source_root: self.ctx.resolver().root().to_path_buf(),
            socket: socket_path(&self.home),
            modules,
            timers: self.ctx.timers().snapshot(),
        }
    }

    async fn record_reload(&self, summary: &ReloadSummary) {
        let mut stats = self.stats.write().await;
        stats.reloads += 1;
        stats.last_reload_at_unix = unix_seconds_now();
        stats.last_target = Some(summary.target.clone());
    }
}

/// Start the runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, config: HotswapConfig) -> Result<(), RuntimeError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the runtime: watcher, reload processor, control socket, ctrl-c.
///
/// Returns `Err` when a reload fails fatally.
pub async fn run(home: PathBuf, config: HotswapConfig) -> Result<(), RuntimeError> {
    ensure_runtime_dirs(&home)?;
    let runtime = Arc::new(Runtime::mount(home, config).await?);
    start_heartbeat(&runtime.ctx);

    let (reload_tx, reload_rx) = mpsc::channel::<ReloadJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let runtime = runtime.clone();
        let reload_tx = reload_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(runtime, reload_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let runtime = runtime.clone();
        tokio::spawn(async move {
            let result = reload_processor_task(runtime, reload_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let runtime = runtime.clone();
        let reload_tx = reload_tx.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(runtime, reload_tx, shutdown.clone(), shutdown.subscribe())
                    .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(RuntimeError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, processor_result, socket_result, signal_result) = tokio::join!(
        watcher_handle,
        processor_handle,
        socket_handle,
        signal_handle
    );

    runtime.ctx.timers().cancel(HEARTBEAT_TIMER);
    handle_join("watcher", watcher_result)?;
    handle_join("reload_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("runtime stopped");
    Ok(())
}

fn start_heartbeat(ctx: &Arc<RuntimeContext>) {
    let weak: Weak<RuntimeContext> = Arc::downgrade(ctx);
    ctx.timers()
        .set_interval(HEARTBEAT_TIMER, HEARTBEAT_INTERVAL, Vec::new(), move |_| {
            if let Some(ctx) = weak.upgrade() {
                tracing::info!(
                    modules = ctx.tracked().len(),
                    bindings = ctx.references().len(),
                    timers = ctx.timers().len(),
                    "heartbeat"
                );
            }
        });
}

async fn watcher_task(
    runtime: Arc<Runtime>,
    reload_tx: mpsc::Sender<ReloadJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), RuntimeError> {
    if !runtime.config.enabled {
        tracing::info!("watcher disabled by config");
        let _ = shutdown_rx.recv().await;
        return Ok(());
    }

    let root = runtime.ctx.resolver().root().to_path_buf();
    let (_watcher, mut event_rx) = watcher::watch(&root)?;
    let mut source_watcher = SourceWatcher::new(runtime.ctx.clone(), runtime.config.clone());

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };

                for target in source_watcher.on_event(event, Instant::now()) {
                    match enqueue_reload(&reload_tx, target, "watcher").await {
                        Ok(summary) => {
                            tracing::info!(
                                target = %summary.target,
                                modules = summary.modules.len(),
                                duration_ms = summary.duration_ms,
                                "watcher-triggered reload completed",
                            );
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "watcher-triggered reload failed");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

async fn reload_processor_task(
    runtime: Arc<Runtime>,
    mut reload_rx: mpsc::Receiver<ReloadJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), RuntimeError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = reload_rx.recv() => {
                let Some(job) = maybe_job else { break };
                tracing::debug!(target = %job.target.label(), source = job.source, "reload requested");

                match runtime.ctx.run(&job.target).await {
                    Ok(summary) => {
                        runtime.record_reload(&summary).await;
                        let _ = job.respond_to.send(Ok(summary));
                    }
                    Err(err) => {
                        let _ = job.respond_to.send(Err(err.to_string()));
                        if err.is_fatal() {
                            tracing::error!(error = %err, "fatal reload failure, shutting down");
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    runtime: Arc<Runtime>,
    reload_tx: mpsc::Sender<ReloadJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), RuntimeError> {
    let run = run_dir(&runtime.home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&runtime.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let runtime = runtime.clone();
                let reload_tx = reload_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, runtime, reload_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    runtime: Arc<Runtime>,
    reload_tx: mpsc::Sender<ReloadJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), RuntimeError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("control socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: ControlRequest = match line.parse() {
            Ok(request) => request,
            Err(message) => {
                tracing::debug!(error = %message, "rejected control request");
                write_response(&mut writer, &ControlResponse::error(message)).await?;
                continue;
            }
        };

        let response = handle_request(&runtime, &reload_tx, &shutdown_tx, &request).await;
        write_response(&mut writer, &response).await?;
        if request == ControlRequest::Stop {
            break;
        }
    }

    Ok(())
}

async fn handle_request(
    runtime: &Runtime,
    reload_tx: &mpsc::Sender<ReloadJob>,
    shutdown_tx: &broadcast::Sender<()>,
    request: &ControlRequest,
) -> ControlResponse {
    match request {
        ControlRequest::Status => ControlResponse::ok(runtime.status().await),
        ControlRequest::Timers => ControlResponse::ok(runtime.ctx.timers().snapshot()),
        ControlRequest::Reload { module } => {
            let target = match runtime.reload_target(module.as_deref()) {
                Ok(target) => target,
                Err(message) => return ControlResponse::error(message),
            };
            match enqueue_reload(reload_tx, target, "socket").await {
                Ok(summary) => ControlResponse::ok(summary),
                Err(err) => ControlResponse::error(err.to_string()),
            }
        }
        ControlRequest::Stop => {
            let _ = shutdown_tx.send(());
            ControlResponse::ok(StopAck { stopping: true })
        }
    }
}

#[derive(Serialize)]
struct StopAck {
    stopping: bool,
}

impl Runtime {
    /// A named module must be tracked or have a backing file. Loading an
    /// untracked file only refreshes the cache; a name with no file is
    /// refused, since its load would fail fatally.
    fn reload_target(&self, module: Option<&str>) -> Result<ReloadTarget, String> {
        let Some(specifier) = module else {
            return Ok(ReloadTarget::All);
        };
        let id = self.ctx.resolve(specifier).map_err(|err| err.to_string())?;
        if self.ctx.is_tracked(&id) {
            return Ok(ReloadTarget::Module(id));
        }
        if self.source.path_of(&id).is_none() {
            return Err(format!(
                "module '{id}' is not tracked and has no file under {}",
                self.ctx.resolver().root().display()
            ));
        }
        tracing::info!(module = %id, "reloading untracked module; cache refresh only");
        Ok(ReloadTarget::Module(id))
    }
}

async fn enqueue_reload(
    reload_tx: &mpsc::Sender<ReloadJob>,
    target: ReloadTarget,
    source: &'static str,
) -> Result<ReloadSummary, RuntimeError> {
    let (tx, rx) = oneshot::channel();
    reload_tx
        .send(ReloadJob {
            target,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| RuntimeError::ChannelClosed("reload queue"))?;

    let outcome = rx
        .await
        .map_err(|_| RuntimeError::ChannelClosed("reload response"))?;
    outcome.map_err(RuntimeError::Protocol)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), RuntimeError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(RuntimeError::Protocol(format!(
                "control socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale control socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), RuntimeError> {
    let run = run_dir(home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &ControlResponse,
) -> Result<(), RuntimeError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("control socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("control socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("control socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), RuntimeError>, tokio::task::JoinError>,
) -> Result<(), RuntimeError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(RuntimeError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), RuntimeError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), RuntimeError> {
    Ok(())
}
