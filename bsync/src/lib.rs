//! Command line and HTTP front ends of the bsync replication engine
//!
//! - `bsync` downloads, uploads, replicates and mirrors trees of objects from the command line
//! - `bsyncd` exposes the mirror pipeline over HTTP
//!
//! Both binaries are thin: they translate flags and requests into calls to the `common` crate
//! and turn the resulting reports into exit codes or HTTP statuses.

pub mod args;
pub mod mirror;
pub mod server;
