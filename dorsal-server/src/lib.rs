//! Job orchestration for the dorsal backup coordinator: job manager, dispatch
//! queue, scheduler, notification bus, and the HTTP surface that ties them to
//! agents and observers.

pub mod api;
pub mod manager;
pub mod notify;
pub mod queue;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod signal_handler;
