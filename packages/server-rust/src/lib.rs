//! Roastery Server: operation registry, execution history and HTTP façade.

pub mod network;
pub mod service;

pub use network::{NetworkConfig, NetworkModule};
pub use service::{OperationRegistry, RegistryConfig};
