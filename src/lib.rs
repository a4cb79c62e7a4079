//! Ramping virtual-user load generator for the screenshot API.
//!
//! A [`Controller`] follows a [`RampProfile`], growing and shrinking a pool
//! of virtual users. Each one loops over `GET /api/screenshot?url=<target>`,
//! checks the status and pauses, while an [`Aggregator`] tallies the results.

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod error;
pub mod pool;
pub mod report;
pub mod schedule;
pub mod targets;
pub mod transport;
pub mod worker;

pub use aggregator::{Aggregator, CheckResult, RunSummary};
pub use config::Config;
pub use controller::Controller;
pub use error::{ConfigError, TransportError};
pub use pool::{StopSignal, VuId, VuPool, VuState, WorkerFactory};
pub use schedule::{RampProfile, ScheduleState, Stage};
pub use targets::{Endpoint, RequestTarget, TargetPool};
pub use transport::{HttpTransport, Response, Transport};
pub use worker::{Check, HttpWorkerFactory, Worker, WorkerContext};
