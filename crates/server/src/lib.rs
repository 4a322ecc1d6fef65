pub mod alloc;
pub mod cli;
pub mod error;
pub mod listen;

pub use error::{Result, ServerError};
pub use listen::MuxServer;
