pub mod codec;
pub mod retry;

pub use codec::{build_request, build_response, parse_request, parse_response};
pub use retry::retries_within_timeout;

use thiserror::Error;

/// Default UDP port of the mux exchange on both peers.
pub const DEFAULT_MUX_PORT: u16 = 8739;

/// Length of the per-datagram random salt.
pub const SALT_LEN: usize = 16;

/// Length of the keyed-BLAKE2b tag appended to every datagram.
pub const MAC_LEN: usize = 64;

/// The identity length is carried in a single byte, which caps it at 255.
pub const MAX_IDENT_LEN: usize = 255;

/// Keyed BLAKE2b takes at most 64 key bytes; the shared secret is used as
/// the key verbatim, so deployments are bound to the same limit.
pub const MAX_SECRET_LEN: usize = 64;

/// Response payload: `ssh_port` and `tun_port`, two big-endian u16s.
pub const RESPONSE_PAYLOAD_LEN: usize = 4;

/// Total length of a response datagram. Responses are fixed-shape.
pub const RESPONSE_LEN: usize = 1 + RESPONSE_PAYLOAD_LEN + SALT_LEN + MAC_LEN;

/// Longest request datagram: one length byte, a maximum-length identity,
/// salt, and tag.
pub const MAX_REQUEST_LEN: usize = 1 + MAX_IDENT_LEN + SALT_LEN + MAC_LEN;

/// Errors raised when building a datagram from invalid inputs.
///
/// Parsing never reports a reason; an inbound datagram either authenticates
/// or it does not.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("identity must be 1-{MAX_IDENT_LEN} bytes, got {0}")]
    IdentLength(usize),

    #[error("auth secret must be 1-{MAX_SECRET_LEN} bytes")]
    SecretLength,
}
