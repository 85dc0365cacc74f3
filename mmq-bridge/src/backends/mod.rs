//! Hardware backends for the bridge. The simulated board lives in `mmq_server::sim`.
pub mod uio;
