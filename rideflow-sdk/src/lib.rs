//! Shared vocabulary of the rideflow services.
//!
//! Nothing in this crate performs I/O. It defines the JSON shapes exchanged
//! over HTTP, over the realtime channels and across the broker, plus the
//! bearer-token claim set both services verify.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod auth;
pub mod objects;
