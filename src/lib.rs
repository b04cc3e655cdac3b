//! # a3s-dispatch
//!
//! In-process topic dispatcher with late-bound handlers and a bounded
//! worker pool.
//!
//! ## Overview
//!
//! Handlers are plain closures or functions registered against string
//! topics. `emit` triggers them with a dynamically-typed argument list that
//! is adapted to each handler's own parameter list: missing trailing
//! arguments become the parameter type's default value, surplus ones are
//! dropped.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_dispatch::{args, EventBus};
//!
//! # fn example() -> a3s_dispatch::Result<()> {
//! let bus = EventBus::new();
//!
//! bus.subscribe("main:new_follower", |name: String| {
//!     println!("NEW FOLLOWER: {}", name);
//! })?;
//! bus.subscribe("main:new_follower", || println!("You have a new follower!"))?;
//!
//! // Newest handler fires first
//! bus.emit("main:new_follower", args![String::from("hello")]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Executors
//!
//! - **inline** — run on the emitting thread (default)
//! - **pool** — fixed worker set over a bounded queue, `submit` blocks when full
//! - **threadPerTask** — one thread per invocation, unbounded
//!
//! ## Architecture
//!
//! - **EventBus** — public façade: subscribe, unsubscribe, emit
//! - **SubscriptionRegistry** — topic → ordered subscriptions under one lock
//! - **Callback** — type-erased handler with an introspectable signature
//! - **adapter** — arity adaptation of emitted arguments
//! - **Executor** — strategy for asynchronous delivery

pub mod adapter;
pub mod bus;
pub mod callback;
pub mod config;
pub mod error;
pub mod pool;
pub mod registry;

// Re-export core types
pub use bus::EventBus;
pub use callback::{arg, Arg, Callback, HandlerFn, IntoCallback, Param, ParamSpec};
pub use config::{BusConfig, ExecutorKind};
pub use error::{DispatchError, Result};
pub use pool::{Executor, Inline, Task, ThreadPerTask, WorkerPool, DEFAULT_QUEUE_CAPACITY};
pub use registry::{Delivery, Subscription, SubscriptionRegistry};
