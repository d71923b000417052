//! Vendor API adapters for vendorgate.
//!
//! Each adapter implements the [`Adapter`] trait defined in [`traits`],
//! exposing a vendor's API as tools. [`RestAdapter`] covers REST vendors
//! generically; every call it makes goes through the token guard from
//! `vendorgate-auth`.

pub mod error;
pub mod rest;
pub mod traits;

pub use error::{AdapterError, Result};
pub use rest::RestAdapter;
pub use traits::{Adapter, AdapterType, AuthRequirement, HealthStatus, ToolDefinition};
