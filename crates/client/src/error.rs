use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire format error: {0}")]
    Codec(#[from] ssh_reverse_mux_protocol::CodecError),

    #[error("cannot resolve host '{0}'")]
    HostResolve(String),

    #[error("auth secret must be 1-64 bytes")]
    SecretLength,

    #[error("identity command exited with {0}")]
    IdentCommand(std::process::ExitStatus),

    #[error("no 'Serial' line in {0}")]
    NoSerial(String),

    #[error("identity must be 1-255 bytes, got {0}")]
    IdentLength(usize),

    #[error("negotiation timed out")]
    Timeout,

    #[error("negotiation cancelled by signal")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ClientError>;
