#![forbid(unsafe_code)]

pub mod auth;
pub mod connection;
pub mod counters;
pub mod error;
pub mod events;
pub mod health;
pub mod hub;
pub mod notifications;
pub mod orders;
pub mod room_router;
pub mod sessions;

#[cfg(test)]
mod counters_tests;

#[cfg(test)]
mod hub_tests;

#[cfg(test)]
mod room_router_tests;
