use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Woocommerce,
    Medusa,
}

impl Engine {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "woocommerce" => Some(Engine::Woocommerce),
            "medusa" => Some(Engine::Medusa),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Woocommerce => "woocommerce",
            Engine::Medusa => "medusa",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StoreStatus {
    Provisioning,
    Ready,
    Failed,
    Deleting,
    Deleted,
}

impl StoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreStatus::Provisioning => "PROVISIONING",
            StoreStatus::Ready => "READY",
            StoreStatus::Failed => "FAILED",
            StoreStatus::Deleting => "DELETING",
            StoreStatus::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROVISIONING" => Some(StoreStatus::Provisioning),
            "READY" => Some(StoreStatus::Ready),
            "FAILED" => Some(StoreStatus::Failed),
            "DELETING" => Some(StoreStatus::Deleting),
            "DELETED" => Some(StoreStatus::Deleted),
            _ => None,
        }
    }

    /// Whether `self -> next` is a permitted transition per the status graph.
    pub fn can_transition_to(&self, next: StoreStatus) -> bool {
        use StoreStatus::*;
        matches!(
            (*self, next),
            (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Provisioning, Deleting)
                | (Ready, Deleting)
                | (Failed, Deleting)
                | (Deleting, Deleted)
                | (Deleting, Failed)
        )
    }
}

/// The single core entity: one provisioned tenant instance.
#[derive(Debug, Clone)]
pub struct Store {
    pub id: String,
    pub name: String,
    pub engine: Engine,
    pub namespace: String,
    pub release: String,
    pub status: StoreStatus,
    pub failure_reason: Option<String>,
    pub store_url: Option<String>,
    pub db_root_password: String,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub admin_username: String,
    pub admin_password: String,
    pub admin_email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The public-facing view of a `Store`. Credentials other than the admin
/// username/email are never included.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub id: String,
    pub name: String,
    pub engine: String,
    pub namespace: String,
    pub helm_release: String,
    pub status: String,
    pub store_url: Option<String>,
    pub failure_reason: Option<String>,
    pub admin_username: String,
    pub admin_email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Store> for StoreSnapshot {
    fn from(s: &Store) -> Self {
        StoreSnapshot {
            id: s.id.clone(),
            name: s.name.clone(),
            engine: s.engine.as_str().to_string(),
            namespace: s.namespace.clone(),
            helm_release: s.release.clone(),
            status: s.status.as_str().to_string(),
            store_url: s.store_url.clone(),
            failure_reason: s.failure_reason.clone(),
            admin_username: s.admin_username.clone(),
            admin_email: s.admin_email.clone(),
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStoreRequest {
    pub name: String,
    pub engine: String,
    pub admin_username: String,
    pub admin_password: String,
    pub admin_email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListStoresResponse {
    pub stores: Vec<StoreSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteStoreResponse {
    pub id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// Fields an `UpdateStatus` call may set alongside the new status.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub failure_reason: Option<String>,
    pub store_url: Option<String>,
}
