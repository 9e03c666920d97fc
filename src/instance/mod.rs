//! The two halves of the provisioning API: the immutable [`InstanceSpec`]
//! describing what to provision, and the [`InstanceManager`] owning the
//! runtime state of one provisioned instance.

pub mod manager;
pub mod spec;

pub use manager::{InstanceManager, DEFAULT_IMAGE};
pub use spec::InstanceSpec;
