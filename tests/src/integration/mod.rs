//! Cross-crate integration scenarios.

pub mod fixtures;

mod cache;
mod config;
mod fragmentation;
mod limits;
mod load_balancing;
mod requests;
mod tickers;
