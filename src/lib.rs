//! Podlink library interface
//!
//! This crate turns synthetic pod addresses such as
//! `foo.bar.pod.cluster.local:9200` into usable network connections by
//! establishing a port-forward tunnel from an ephemeral local port to the
//! pod's target port and redirecting dials to that local port.
//!
//! # Module Organization
//!
//! - [`errors`] - Error types (PodlinkError, Result)
//! - [`resolver`] - Synthetic pod address parsing (PodAddress, ResolvedTarget)
//! - [`forwarder`] - Tunnel lifecycle and dial path (PodForwarder)

pub mod errors;
pub mod forwarder;
pub mod resolver;

pub use errors::{PodlinkError, Result};
pub use forwarder::{
    BoxedConn, Conn, DialerFunc, EphemeralPortFinder, PodForwarder, Tunnel, TunnelFactory,
};
pub use resolver::{resolve_pod_addr, PodAddress, ResolvedTarget};
