//! # cityfix
//!
//! Complaint routing and lifecycle core for a municipal complaint
//! workflow.
//!
//! Citizens file complaints; the [`routing`] engine picks the department
//! that should handle each one from category coverage, zone, distance and
//! current workload; the [`lifecycle`] state machine tracks the complaint
//! until it is closed. Cross-cutting side effects (routing new complaints,
//! releasing workload, notifying reporters) travel as events through the
//! [`relay`].
//!
//! Storage sits behind the traits in [`store`], implemented in memory and
//! on Postgres ([`db`], with pgmq for event queues).

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod geo;
pub mod lifecycle;
pub mod model;
pub mod relay;
pub mod retry;
pub mod routing;
pub mod store;
pub mod telemetry;
