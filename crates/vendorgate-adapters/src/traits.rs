//! Core adapter trait and supporting types.
//!
//! Every vendor adapter implements the [`Adapter`] trait, giving the tool
//! server a uniform way to discover and invoke tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vendorgate_auth::VendorKind;

use crate::error::Result;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// The category of service an adapter fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterType {
    /// CRM platforms (HubSpot, Salesforce).
    Crm,
    /// Messaging and meetings (Zoom, Teams, Outlook).
    Messaging,
    /// Documents and knowledge bases (Notion, OneDrive).
    Documents,
    /// Developer platforms (GitHub).
    DevTools,
    /// Storefronts (Shopify).
    Commerce,
    /// Anything without a dedicated category.
    Other,
}

impl AdapterType {
    /// Category of a vendor.
    pub fn for_vendor(vendor: &str, kind: VendorKind) -> Self {
        match kind {
            VendorKind::HubSpot | VendorKind::Salesforce => Self::Crm,
            VendorKind::Zoom => Self::Messaging,
            VendorKind::Notion => Self::Documents,
            VendorKind::GitHub => Self::DevTools,
            VendorKind::Shopify => Self::Commerce,
            VendorKind::Microsoft => match vendor {
                "onedrive" | "sharepoint" | "mexcel" => Self::Documents,
                _ => Self::Messaging,
            },
            VendorKind::Generic => Self::Other,
        }
    }
}

impl std::fmt::Display for AdapterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crm => write!(f, "crm"),
            Self::Messaging => write!(f, "messaging"),
            Self::Documents => write!(f, "documents"),
            Self::DevTools => write!(f, "devtools"),
            Self::Commerce => write!(f, "commerce"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// The health status of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// A usable token is on record.
    Healthy,
    /// The token could not be refreshed right now; a retry may succeed.
    Degraded,
    /// The operator has to authorize (again).
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A tool exposed by an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Machine-readable tool name (e.g. `api_request`).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    pub parameters: serde_json::Value,
}

/// Authentication requirements for an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequirement {
    /// The vendor whose credential is used.
    pub provider: String,
    /// The local credential owner.
    pub user_id: String,
    /// The scopes requested at authorization time.
    pub scopes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Core trait
// ---------------------------------------------------------------------------

/// The universal adapter interface.
///
/// The tool server discovers tools via [`Adapter::tools`] and executes them
/// via [`Adapter::execute_tool`].
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Unique identifier of this adapter instance (the vendor id).
    fn id(&self) -> &str;

    fn adapter_type(&self) -> AdapterType;

    /// Whether the adapter can currently obtain a usable token.
    async fn health_check(&self) -> Result<HealthStatus>;

    fn tools(&self) -> Vec<ToolDefinition>;

    /// Execute a named tool with the given JSON parameters.
    async fn execute_tool(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value>;

    fn required_auth(&self) -> Option<AuthRequirement>;
}
