use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

use ssh_reverse_mux_protocol::DEFAULT_MUX_PORT;

/// Inclusive range of remote ports handed out to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        (self.first..=self.last).contains(&port)
    }

    /// Candidate ports in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.first..=self.last
    }
}

impl FromStr for PortRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let (a, b) = s
            .split_once(':')
            .ok_or_else(|| format!("expected A:B, got '{s}'"))?;
        let first: u16 = a.parse().map_err(|_| format!("invalid port '{a}'"))?;
        let last: u16 = b.parse().map_err(|_| format!("invalid port '{b}'"))?;
        if first == 0 || last == 0 || first == u16::MAX || last == u16::MAX {
            return Err("ports must be between 1 and 65534".to_owned());
        }
        if first > last {
            return Err(format!("range start {first} exceeds end {last}"));
        }
        Ok(Self { first, last })
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.first, self.last)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ssh-reverse-mux-server",
    version,
    about = "Allocate stable reverse-tunnel ports to authenticated clients over UDP"
)]
pub struct Cli {
    /// Address to bind the mux socket on
    #[arg(value_name = "BIND", default_value = "::")]
    pub bind: String,

    /// Shared authentication secret (1-64 bytes)
    #[arg(
        short = 's',
        long = "auth-secret",
        value_name = "STRING",
        required_unless_present = "ident_list"
    )]
    pub auth_secret: Option<String>,

    /// Path of the identity database
    #[arg(
        short = 'i',
        long = "ident-db",
        value_name = "PATH",
        default_value = "ssh-reverse-mux-ident.db"
    )]
    pub ident_db: PathBuf,

    /// Dump the stored identity table and exit
    #[arg(short = 'l', long = "ident-list")]
    pub ident_list: bool,

    /// UDP port to listen on
    #[arg(short = 'm', long = "mux-port", default_value_t = DEFAULT_MUX_PORT)]
    pub mux_port: u16,

    /// sshd port reported to clients
    #[arg(short = 'p', long = "ssh-port", default_value_t = 22)]
    pub ssh_port: u16,

    /// Inclusive range of reverse-tunnel ports, as A:B
    #[arg(
        short = 'r',
        long = "tunnel-port-range",
        value_name = "A:B",
        default_value = "22000:22100"
    )]
    pub tunnel_port_range: PortRange,

    /// Number of response datagrams sent per request
    #[arg(short = 'n', long = "attempts", default_value_t = 4)]
    pub attempts: u32,

    /// Wall-clock budget for the response repeats, in seconds
    #[arg(short = 't', long = "timeout", default_value_t = 5.0)]
    pub timeout: f64,

    /// Verbose logging
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with(args: &[&str]) -> Cli {
        let mut full_args = vec!["ssh-reverse-mux-server"];
        full_args.extend_from_slice(args);
        Cli::parse_from(full_args)
    }

    #[test]
    fn defaults() {
        let cli = cli_with(&["-s", "secret"]);
        assert_eq!(cli.bind, "::");
        assert_eq!(cli.mux_port, 8739);
        assert_eq!(cli.ssh_port, 22);
        assert_eq!(
            cli.tunnel_port_range,
            PortRange {
                first: 22000,
                last: 22100
            }
        );
        assert_eq!(cli.attempts, 4);
        assert_eq!(cli.timeout, 5.0);
        assert!(!cli.ident_list);
    }

    #[test]
    fn ident_list_does_not_require_secret() {
        let cli = cli_with(&["-l"]);
        assert!(cli.ident_list);
        assert!(cli.auth_secret.is_none());
    }

    #[test]
    fn port_range_parses() {
        let range: PortRange = "22000:22100".parse().expect("parse");
        assert!(range.contains(22000));
        assert!(range.contains(22100));
        assert!(!range.contains(21999));
        assert!(!range.contains(22101));
    }

    #[test]
    fn port_range_single_port() {
        let range: PortRange = "22000:22000".parse().expect("parse");
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![22000]);
    }

    #[test]
    fn port_range_rejects_garbage() {
        assert!("22000".parse::<PortRange>().is_err());
        assert!("a:b".parse::<PortRange>().is_err());
        assert!("22100:22000".parse::<PortRange>().is_err());
        assert!("0:22000".parse::<PortRange>().is_err());
        assert!("22000:65535".parse::<PortRange>().is_err());
    }
}
