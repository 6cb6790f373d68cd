//! Custom resources the verification workflow talks to.
//!
//! - `Cluster`: the CloudNativePG PostgreSQL cluster whose volumes get expanded

mod cluster;

pub use cluster::*;
