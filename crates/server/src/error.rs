use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity store error: {0}")]
    Store(#[from] ssh_reverse_mux_store::StoreError),

    #[error("cannot resolve bind address '{0}'")]
    BindResolve(String),

    #[error("auth secret must be 1-64 bytes")]
    SecretLength,
}

pub type Result<T> = std::result::Result<T, ServerError>;
