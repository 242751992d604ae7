//! `queue` crate: task dispatch.
//!
//! One [`TaskQueue`] interface, two implementations:
//! - [`DrainQueue`] buffers references and replays an execution in-process
//!   through [`DrainQueue::drain_all`];
//! - [`BrokerQueue`] publishes references to a [`Broker`] for a [`Worker`]
//!   to pick up ([`ChannelBroker`] in-process, [`PgBroker`] over Postgres).
//!
//! Both end up calling the same [`TaskRunner::run_one`].

pub mod broker;
pub mod channel;
pub mod drain;
pub mod error;
pub mod postgres;
pub mod traits;
pub mod worker;

pub use broker::{Broker, BrokerQueue, Delivery, TaskMessage};
pub use channel::ChannelBroker;
pub use drain::{DrainQueue, DrainReport, DEFAULT_MAX_ITERATIONS};
pub use error::QueueError;
pub use postgres::PgBroker;
pub use traits::{TaskQueue, TaskRef, TaskRunner};
pub use worker::{Worker, WorkerConfig};
