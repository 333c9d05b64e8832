//! Dispatcher - typed, in-process publish/subscribe.
//!
//! ## Architecture
//!
//! ```text
//!  publish(kind, payload) ──▶ ┌─────────────────────────────┐
//!  publish(kind, payload) ──▶ │ VecDeque<Envelope> (FIFO)   │ ◀── Mutex + Condvar
//!                             └─────────────────────────────┘
//!                                           │ pop
//!                                           ▼
//!                             ┌─────────────────────────────┐
//!                             │ drain loop                  │
//!                             │ (own thread or pool task)   │
//!                             └─────────────────────────────┘
//!                                           │ lookup kind
//!                                           ▼
//!                             ┌─────────────────────────────┐
//!                             │ Registry: kind → [handler]  │ ◀── RwLock
//!                             └─────────────────────────────┘
//!                                 │        │         │
//!                                 ▼        ▼         ▼
//!                                h1  →    h2   →    h3    (registration order)
//! ```
//!
//! ## Hosting the drain loop on a pool
//!
//! ```
//! use pooled_bus::{Dispatcher, DispatcherConfig, WorkerPool};
//! use std::sync::Arc;
//!
//! let pool = WorkerPool::new(4).unwrap();
//! let bus = Dispatcher::on_pool(&pool, DispatcherConfig::default()).unwrap();
//!
//! bus.subscribe(2, |text: Arc<String>| println!("received {}", text));
//! bus.publish(2, String::from("hello, bus")).unwrap();
//!
//! let stats = bus.shutdown();
//! assert_eq!(stats.delivered, 1);
//! pool.shutdown();
//! ```

mod dispatcher;
mod envelope;
mod error;
mod registry;
mod stats;

pub use dispatcher::Dispatcher;
pub use envelope::{Envelope, EventKind};
pub use error::{DispatchError, HandlerFault};
pub use registry::SubscriptionId;
pub use stats::DispatchStats;
