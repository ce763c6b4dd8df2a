//! Offline cache agent: cache-first request handling with versioned cache
//! generations, precaching at install and stale generation cleanup at
//! activation.

pub mod agent;
pub mod cache;
pub mod clients;
pub mod config;
pub mod event;
pub mod host;
pub mod http;
pub mod logging;
pub mod network;

#[cfg(test)]
mod testing;
