//! Ambient service-lifecycle scaffolding shared by managed services in this
//! crate: a plain configuration struct and a registry that initializes/shuts
//! services down in registration order.

pub mod config;
pub mod registry;

pub use config::ServerConfig;
pub use registry::{ManagedService, ServiceContext, ServiceRegistry};
