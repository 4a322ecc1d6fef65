use clap::Parser;

use ssh_reverse_mux_protocol::DEFAULT_MUX_PORT;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ssh-reverse-mux-client",
    version,
    about = "Negotiate a stable reverse-tunnel port, then exec ssh -R"
)]
pub struct Cli {
    /// Remote host as [user@]hostname[:port]; :port overrides --mux-port
    #[arg(value_name = "HOST")]
    pub host: String,

    /// Shared authentication secret (1-64 bytes)
    #[arg(short = 's', long = "auth-secret", value_name = "STRING")]
    pub auth_secret: String,

    /// Literal identity string, overriding the identity sources
    #[arg(short = 'i', long = "ident-string", value_name = "STRING")]
    pub ident_string: Option<String>,

    /// Derive the identity from the Raspberry Pi serial in /proc/cpuinfo
    #[arg(long = "ident-rpi", conflicts_with = "ident_string")]
    pub ident_rpi: bool,

    /// Derive the identity from the trimmed stdout of a shell command
    #[arg(
        long = "ident-cmd",
        value_name = "SHELL-CMD",
        conflicts_with_all = ["ident_string", "ident_rpi"]
    )]
    pub ident_cmd: Option<String>,

    /// UDP port of the mux server
    #[arg(short = 'm', long = "mux-port", default_value_t = DEFAULT_MUX_PORT)]
    pub mux_port: u16,

    /// Override the sshd port reported by the server
    #[arg(short = 'p', long = "ssh-port")]
    pub ssh_port: Option<u16>,

    /// Number of request datagrams before giving up
    #[arg(short = 'n', long = "attempts", default_value_t = 6)]
    pub attempts: u32,

    /// Negotiation budget in seconds
    #[arg(short = 't', long = "timeout", default_value_t = 10.0)]
    pub timeout: f64,

    /// Command run after negotiation with ssh_port and tun_port appended;
    /// repeat for an argument vector, or give a single shell string
    #[arg(
        short = 'c',
        long = "mux-hook",
        value_name = "CMD",
        action = clap::ArgAction::Append,
        allow_hyphen_values = true
    )]
    pub mux_hook: Vec<String>,

    /// Verbose logging
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Pass -vvv to ssh
    #[arg(long = "debug-ssh")]
    pub debug_ssh: bool,
}

/// The positional host argument, torn into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHost {
    pub user: Option<String>,
    pub host: String,
    pub mux_port: Option<u16>,
}

impl ParsedHost {
    /// `user@host` when a login user was given, bare `host` otherwise.
    pub fn login(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

impl Cli {
    pub fn parse_host(&self) -> ParsedHost {
        let (user, rest) = match self.host.split_once('@') {
            Some((user, rest)) => (Some(user.to_owned()), rest),
            None => (None, self.host.as_str()),
        };

        // Only strip a trailing :port when the remainder is not itself
        // colon-separated, which keeps bare IPv6 literals intact.
        if let Some((host, port)) = rest.rsplit_once(':') {
            if !host.contains(':') {
                if let Ok(port) = port.parse::<u16>() {
                    return ParsedHost {
                        user,
                        host: host.to_owned(),
                        mux_port: Some(port),
                    };
                }
            }
        }

        ParsedHost {
            user,
            host: rest.to_owned(),
            mux_port: None,
        }
    }
}
