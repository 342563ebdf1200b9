//! MITM capture addon: OAuth header repair and wire-trace persistence.

pub mod addon;
pub mod flow;

pub use addon::MitmAddon;
pub use flow::{FlowRequest, FlowResponse};
