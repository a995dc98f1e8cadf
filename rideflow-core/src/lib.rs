#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod broker;
pub mod config;
pub mod entities;
pub mod events;
pub mod framework;
pub mod lifecycle;
pub mod matching;
pub mod processors;
pub mod realtime;
pub mod services;
pub mod stores;
pub mod utils;

#[cfg(test)]
mod testing;
