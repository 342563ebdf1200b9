//! Handler front-end and process supervision for ccproxy.

pub mod handler;
pub mod preflight;

pub use handler::{ProxyHandler, RoutingStatus, UpstreamDispatch, UpstreamError};
pub use preflight::{PreflightError, get_port_pid, run_preflight};
