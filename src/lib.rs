//! codescout - incremental hybrid code index
//!
//! Turns a source tree into searchable records spread across three stores
//! (semantic vectors, BM25 keywords, call graph), keeps them consistent as
//! files change, and answers queries with a fused vector+keyword ranking.

pub mod config;
pub mod embedding;
pub mod errors;
pub mod ident;
pub mod indexer;
pub mod model;
pub mod parser;
pub mod query;
pub mod registry;
pub mod scanner;
pub mod store;
pub mod strategy;
