mod config;
mod dispatcher;
mod lifecycle;
mod panic;
mod pool;

pub use config::{ConfigError, DispatcherConfig, PoolConfig};
pub use dispatcher::{
    DispatchError, DispatchStats, Dispatcher, Envelope, EventKind, HandlerFault, SubscriptionId,
};
pub use lifecycle::Lifecycle;
pub use pool::{PoolError, PoolStats, TaskId, WorkerPool};
