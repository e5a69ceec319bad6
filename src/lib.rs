//! Armitage — a rate-limited chat bot runtime.
//!
//! Connects to a messaging platform through a gateway bridge, classifies
//! inbound events, dispatches message events to registered handlers with
//! isolation and timeouts, and delivers replies through per-destination
//! FIFO queues under a global rate limit.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod config;
pub mod event;
pub mod handler;
pub mod handlers;
pub mod limiter;
pub mod logging;
pub mod messenger;
pub mod plugin;
pub mod response;
pub mod service;
pub mod store;
