//! Batched loading of 360° image collections from a cursor-paginated graph
//! query backend, and reconstruction of their geometry.

pub mod annotation;
pub mod assembler;
pub mod backend;
pub mod coalescer;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod output;
pub mod query;
pub mod transform;
pub mod version;
