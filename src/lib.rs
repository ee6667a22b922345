#![doc = include_str!("../README.md")]
#![deny(unsafe_code, missing_docs)]

pub mod collector;
pub mod config;
pub mod cputime;
pub mod dedup;
pub mod error;
pub mod packet;
pub mod producer;
pub mod reorder;
pub mod session;
pub mod signal;
pub mod sink;
