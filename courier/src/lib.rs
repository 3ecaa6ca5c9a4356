//! Courier: a durable, priority-ordered outbound mail queue
//!
//! Producers queue messages in a store; the `courier` daemon drains the
//! store through a mail transport, one locked pass at a time, and records
//! each outcome in the delivery log. `courierctl` enqueues, inspects and
//! retries messages against the same store.

pub mod controller;

pub use controller::{CONFIG_ENV, Courier, find_config_file};
