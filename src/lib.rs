pub mod config;
pub mod context;
pub mod cv;
pub mod error;
pub mod metrics;
pub mod providers;
pub mod registry;
pub mod server;
pub mod storage;
pub mod types;

pub use context::AppContext;
pub use error::RelayGateError;
pub type Result<T> = std::result::Result<T, RelayGateError>;
