pub mod checkpoint;
pub mod error;
pub mod explorer;
pub mod filter;
pub mod lifecycle;
pub mod node;
pub mod pool;
pub mod resolver;
pub mod rpc;
pub mod status;
pub mod sync;
pub mod types;

#[cfg(test)]
mod test_util;

pub use error::CoreError;
pub use explorer::Explorer;
pub use node::{NodeContext, NodeSessions};
pub use status::Status;
pub use types::{AccountConfig, Currency, Transaction};
