// src/network/mod.rs
pub mod local;
pub mod transport;

// Re-export for easy access from outside the network module
pub use local::LocalNetwork;
pub use transport::Transport;
