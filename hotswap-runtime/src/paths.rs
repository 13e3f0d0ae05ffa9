use std::path::{Path, PathBuf};
use std::time::Duration;

pub const RUNTIME_SOCKET: &str = "hotswap.sock";
/// How often the runtime logs a liveness line.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
pub const HEARTBEAT_TIMER: &str = "hotswap.heartbeat";

pub fn hotswap_root(home: &Path) -> PathBuf {
    home.join(".hotswap")
}

pub fn run_dir(home: &Path) -> PathBuf {
    hotswap_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(RUNTIME_SOCKET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_lives_under_run_dir() {
        let home = Path::new("/home/dev");
        assert_eq!(
            socket_path(home),
            PathBuf::from("/home/dev/.hotswap/run/hotswap.sock")
        );
        assert!(socket_path(home).starts_with(run_dir(home)));
    }
}
