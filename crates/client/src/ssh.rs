//! The terminal ssh invocation.

use std::process::Command;

use crate::cli::ParsedHost;

/// Options every tunnel invocation carries. Operators depend on these
/// exact semantics: no control master, batch mode, keepalives tight
/// enough to detect a dead tunnel, and a hard failure when the remote
/// forwarding cannot be established.
const SSH_FIXED_OPTS: &[&str] = &[
    "-oControlPath=none",
    "-oControlMaster=no",
    "-oConnectTimeout=180",
    "-oServerAliveInterval=6",
    "-oServerAliveCountMax=10",
    "-oBatchMode=yes",
    "-oPasswordAuthentication=no",
    "-oNumberOfPasswordPrompts=0",
    "-oExitOnForwardFailure=yes",
    "-NnT",
];

/// Assemble `ssh -R tun_port:localhost:22` towards `host`.
pub fn ssh_command(host: &ParsedHost, ssh_port: u16, tun_port: u16, verbose: bool) -> Command {
    let mut cmd = Command::new("ssh");
    cmd.args(SSH_FIXED_OPTS);
    if verbose {
        cmd.arg("-vvv");
    }
    cmd.arg(format!("-p{ssh_port}"));
    cmd.arg("-R");
    cmd.arg(format!("{tun_port}:localhost:22"));
    cmd.arg(host.login());
    cmd
}

/// Replace the current process with `cmd`. Returns only when the exec (or
/// spawn, on platforms without process replacement) failed.
pub fn exec(mut cmd: Command) -> std::io::Error {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.exec()
    }
    #[cfg(not(unix))]
    {
        match cmd.status() {
            Ok(status) => std::process::exit(status.code().unwrap_or(1)),
            Err(e) => e,
        }
    }
}
