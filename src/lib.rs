//! Task-dependency orchestration for front-end asset pipelines.
//!
//! Tasks live in a [`core::TaskRegistry`]; the
//! [`orchestration::DependencyResolver`] turns requested names into an
//! [`core::ExecutionPlan`] of barrier-separated groups, and the
//! [`orchestration::Scheduler`] runs it. [`pipeline`] declares the concrete
//! style-guide build on top.

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod pipeline;
pub mod util;

pub use error::{ActionError, Error, Result};
