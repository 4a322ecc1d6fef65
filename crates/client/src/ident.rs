//! Identity sources for the client.
//!
//! Machine-derived identities are keyed-BLAKE2b digests (32 bytes, keyed
//! with the shared secret) so that raw hardware identifiers never travel
//! on the wire. Literal strings and command output are used as-is.

use std::fs;

use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::Blake2bMac;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use ssh_reverse_mux_protocol::MAX_IDENT_LEN;

use crate::cli::Cli;
use crate::error::{ClientError, Result};

const MACHINE_ID_PATH: &str = "/etc/machine-id";
const CPUINFO_PATH: &str = "/proc/cpuinfo";

#[derive(Debug, Clone)]
pub enum IdentSource {
    /// Operator-supplied literal.
    Literal(String),
    /// Keyed digest of `/etc/machine-id`. The default.
    MachineId,
    /// Keyed digest of the `Serial:` value in `/proc/cpuinfo`.
    RpiSerial,
    /// Trimmed stdout of a shell command.
    Command(String),
}

impl IdentSource {
    pub fn from_cli(cli: &Cli) -> Self {
        if let Some(literal) = &cli.ident_string {
            Self::Literal(literal.clone())
        } else if cli.ident_rpi {
            Self::RpiSerial
        } else if let Some(cmd) = &cli.ident_cmd {
            Self::Command(cmd.clone())
        } else {
            Self::MachineId
        }
    }

    /// Produce the identity bytes, 1-255 of them.
    pub async fn resolve(&self, secret: &[u8]) -> Result<Vec<u8>> {
        let ident = match self {
            Self::Literal(s) => s.clone().into_bytes(),
            Self::MachineId => {
                let contents = fs::read(MACHINE_ID_PATH)?;
                keyed_digest(secret, &contents)?.to_vec()
            }
            Self::RpiSerial => {
                let cpuinfo = fs::read_to_string(CPUINFO_PATH)?;
                let serial = rpi_serial(&cpuinfo)
                    .ok_or_else(|| ClientError::NoSerial(CPUINFO_PATH.to_owned()))?;
                keyed_digest(secret, serial.as_bytes())?.to_vec()
            }
            Self::Command(cmd) => {
                debug!(cmd, "running identity command");
                let output = Command::new("sh").arg("-c").arg(cmd).output().await?;
                if !output.status.success() {
                    return Err(ClientError::IdentCommand(output.status));
                }
                trim_ascii(&output.stdout).to_vec()
            }
        };

        if ident.is_empty() || ident.len() > MAX_IDENT_LEN {
            return Err(ClientError::IdentLength(ident.len()));
        }
        Ok(ident)
    }
}

fn keyed_digest(secret: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac =
        Blake2bMac::<U32>::new_from_slice(secret).map_err(|_| ClientError::SecretLength)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn rpi_serial(cpuinfo: &str) -> Option<String> {
    let re = Regex::new(r"(?m)^Serial\s*:\s*(\S+)").ok()?;
    re.captures(cpuinfo)
        .map(|caps| caps[1].to_owned())
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
