//! Post-negotiation hook command.

use tokio::process::Command;
use tracing::{debug, warn};

/// Run the configured hook with `ssh_port` and `tun_port` appended.
///
/// A single argument is treated as a shell command line; multiple
/// arguments form an argv. The hook is advisory: it is waited on, but a
/// failure never stops the ssh exec that follows.
pub async fn run_hook(hook: &[String], ssh_port: u16, tun_port: u16) {
    if hook.is_empty() {
        return;
    }

    let mut cmd = if hook.len() == 1 {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("{} {ssh_port} {tun_port}", hook[0]));
        cmd
    } else {
        let mut cmd = Command::new(&hook[0]);
        cmd.args(&hook[1..])
            .arg(ssh_port.to_string())
            .arg(tun_port.to_string());
        cmd
    };

    debug!(hook = %hook[0], ssh_port, tun_port, "running mux hook");
    match cmd.status().await {
        Ok(status) if status.success() => debug!("mux hook finished"),
        Ok(status) => warn!("mux hook exited with {status}"),
        Err(e) => warn!("mux hook failed to start: {e}"),
    }
}
