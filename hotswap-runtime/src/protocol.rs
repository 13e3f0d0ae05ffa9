//! Control socket protocol: one JSON object per line in each direction.
//!
//! ```text
//! → {"cmd":"reload","module":"commands/ping"}
//! ← {"ok":true,"data":{"target":"commands/ping","modules":[...],"duration_ms":3}}
//! ```
//!
//! Client helpers decode `data` into the typed reply of each command.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread::sleep;
use std::time::Duration;

use hotswap_core::ModuleStatus;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ReloadSummary;
use crate::error::{io_err, RuntimeError};
use crate::paths::socket_path;
use crate::timers::TimerSnapshot;

const COMMANDS: [&str; 4] = ["status", "timers", "reload", "stop"];

/// Attempts made by [`request_status`] while the socket is still coming up.
const STARTUP_ATTEMPTS: u32 = 5;
const STARTUP_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum ControlRequest {
    Status,
    Timers,
    /// Reload one module, or every tracked module when `module` is absent.
    Reload {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
    },
    Stop,
}

impl FromStr for ControlRequest {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let value: Value =
            serde_json::from_str(line).map_err(|err| format!("invalid request JSON: {err}"))?;
        let cmd = match value.get("cmd") {
            Some(Value::String(cmd)) => cmd.clone(),
            _ => return Err("request is missing a 'cmd' string".to_string()),
        };
        if !COMMANDS.contains(&cmd.as_str()) {
            return Err(format!("unknown command '{cmd}'"));
        }
        serde_json::from_value(value).map_err(|err| format!("invalid '{cmd}' request: {err}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(err) => Self::error(format!("failed to encode reply: {err}")),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Decode `data` as `T`, or turn an error reply into [`RuntimeError::Protocol`].
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, RuntimeError> {
        if !self.ok {
            let message = self
                .error
                .unwrap_or_else(|| "runtime reported an error without a message".to_string());
            return Err(RuntimeError::Protocol(message));
        }
        Ok(serde_json::from_value(self.data.unwrap_or(Value::Null))?)
    }
}

/// Reply to `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub running: bool,
    pub started_at_unix: u64,
    pub reloads: u64,
    /// 0 until the first reload.
    pub last_reload_at_unix: u64,
    pub last_target: Option<String>,
    pub watching: bool,
    pub full_reload_on_untracked: bool,
    pub source_root: PathBuf,
    pub socket: PathBuf,
    pub modules: Vec<ModuleReport>,
    pub timers: Vec<TimerSnapshot>,
}

impl RuntimeStatus {
    pub fn module(&self, id: &str) -> Option<&ModuleReport> {
        self.modules.iter().find(|module| module.status.id.as_str() == id)
    }
}

/// One tracked module; `revision` is set for mounted documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleReport {
    #[serde(flatten)]
    pub status: ModuleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

fn connect(socket: &Path) -> Result<UnixStream, RuntimeError> {
    if !socket.exists() {
        return Err(RuntimeError::NotRunning {
            socket: socket.to_path_buf(),
        });
    }
    UnixStream::connect(socket).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound
        | std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset => RuntimeError::NotRunning {
            socket: socket.to_path_buf(),
        },
        _ => io_err(socket, err),
    })
}

/// Write `request` as one line and read one response line back.
pub fn send_request(home: &Path, request: &ControlRequest) -> Result<ControlResponse, RuntimeError> {
    let socket = socket_path(home);
    let mut stream = connect(&socket)?;

    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|e| io_err(&socket, e))?;

    let mut reply = String::new();
    let read = BufReader::new(stream)
        .read_line(&mut reply)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(RuntimeError::Protocol(format!(
            "runtime closed {} without replying to '{}'",
            socket.display(),
            request.command()
        )));
    }
    Ok(serde_json::from_str(reply.trim_end())?)
}

impl ControlRequest {
    pub fn command(&self) -> &'static str {
        match self {
            ControlRequest::Status => "status",
            ControlRequest::Timers => "timers",
            ControlRequest::Reload { .. } => "reload",
            ControlRequest::Stop => "stop",
        }
    }
}

fn call<T: DeserializeOwned>(home: &Path, request: &ControlRequest) -> Result<T, RuntimeError> {
    send_request(home, request)?.into_data()
}

/// `status`, retried briefly while the socket comes up.
pub fn request_status(home: &Path) -> Result<RuntimeStatus, RuntimeError> {
    let mut attempt = 1;
    loop {
        match call(home, &ControlRequest::Status) {
            Err(RuntimeError::NotRunning { .. }) if attempt < STARTUP_ATTEMPTS => {
                attempt += 1;
                sleep(STARTUP_RETRY_DELAY);
            }
            outcome => return outcome,
        }
    }
}

pub fn request_timers(home: &Path) -> Result<Vec<TimerSnapshot>, RuntimeError> {
    call(home, &ControlRequest::Timers)
}

/// `reload` one module, or everything tracked when `module` is `None`.
pub fn request_reload(home: &Path, module: Option<String>) -> Result<ReloadSummary, RuntimeError> {
    call(home, &ControlRequest::Reload { module })
}

pub fn request_stop(home: &Path) -> Result<(), RuntimeError> {
    call::<IgnoredAny>(home, &ControlRequest::Stop).map(|_| ())
}
