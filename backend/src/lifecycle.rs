use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::db::StoreRepository;
use crate::errors::Error;
use crate::models::{
    CreateStoreRequest, DeleteStoreResponse, Engine, StatusUpdate, Store, StoreSnapshot, StoreStatus,
};
use crate::packager::Packager;
use crate::reconciler::Reconciler;

const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";
const PASSWORD_LENGTH: usize = 20;

fn generate_secure_password() -> String {
    let mut rng = rand::rng();
    (0..PASSWORD_LENGTH)
        .map(|_| PASSWORD_ALPHABET[rng.random_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

fn generate_id(name: &str) -> String {
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    format!("{name}-{suffix}")
}

/// The operations the HTTP layer calls directly. Wraps the repository,
/// packager, and reconciler into the entry points spec'd for the core.
pub struct Lifecycle {
    repo: Arc<dyn StoreRepository>,
    packager: Arc<dyn Packager>,
    reconciler: Arc<Reconciler>,
}

impl Lifecycle {
    pub fn new(
        repo: Arc<dyn StoreRepository>,
        packager: Arc<dyn Packager>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            repo,
            packager,
            reconciler,
        }
    }

    pub async fn create_store(&self, req: CreateStoreRequest) -> Result<StoreSnapshot, Error> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation("name must not be empty".to_string()));
        }
        let engine = Engine::parse(&req.engine)
            .ok_or_else(|| Error::Validation(format!("unknown engine: {}", req.engine)))?;
        let admin_username = req.admin_username.trim().to_string();
        let admin_password = req.admin_password;
        let admin_email = req.admin_email.trim().to_string();
        if admin_username.is_empty() || admin_password.is_empty() || admin_email.is_empty() {
            return Err(Error::Validation(
                "admin_username, admin_password, and admin_email are all required".to_string(),
            ));
        }

        let id = generate_id(&name);
        let namespace = format!("store-{id}");
        let release = id.clone();
        let slug = name.replace('-', "_");
        let now = Utc::now();

        let store = Store {
            id: id.clone(),
            name,
            engine,
            namespace,
            release,
            status: StoreStatus::Provisioning,
            failure_reason: None,
            store_url: None,
            db_root_password: generate_secure_password(),
            db_name: format!("store_{slug}_db"),
            db_user: format!("user_{slug}"),
            db_password: generate_secure_password(),
            admin_username,
            admin_password,
            admin_email,
            created_at: now,
            updated_at: now,
        };

        let stored = self.repo.insert(store).await?;
        self.reconciler.submit(stored.id.clone()).await;
        Ok(StoreSnapshot::from(&stored))
    }

    /// Teardown is synchronous: uninstall is fast and bounded, unlike
    /// install, so the API response reflects its outcome directly.
    pub async fn delete_store(&self, id: &str) -> Result<DeleteStoreResponse, Error> {
        let store = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if store.status == StoreStatus::Deleted {
            return Err(Error::InvalidState(format!("store {id} is already deleted")));
        }

        self.repo
            .update_status(id, StoreStatus::Deleting, StatusUpdate::default())
            .await?;

        let outcome = self.packager.uninstall(&store.release, &store.namespace).await;
        if outcome.ok {
            self.repo
                .update_status(id, StoreStatus::Deleted, StatusUpdate::default())
                .await?;
            Ok(DeleteStoreResponse {
                id: id.to_string(),
                status: StoreStatus::Deleted.as_str().to_string(),
                message: "store deleted".to_string(),
            })
        } else {
            let reason = format!("delete failed: {}", outcome.output);
            self.repo
                .update_status(
                    id,
                    StoreStatus::Failed,
                    StatusUpdate {
                        failure_reason: Some(reason.clone()),
                        store_url: None,
                    },
                )
                .await?;
            Err(Error::Internal(reason))
        }
    }

    pub async fn get_store(&self, id: &str) -> Result<StoreSnapshot, Error> {
        let store = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(StoreSnapshot::from(&store))
    }

    pub async fn list_stores(&self) -> Result<Vec<StoreSnapshot>, Error> {
        let stores = self.repo.list().await?;
        Ok(stores.iter().map(StoreSnapshot::from).collect())
    }

    /// Re-submits every `PROVISIONING` row to the reconciler so a
    /// crashed/restarted process converges without manual intervention.
    pub async fn resume_in_flight(&self) -> Result<(), Error> {
        self.reconciler.resume_in_flight().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::classifier::RoleRules;
    use crate::cluster::fake::FakeClusterReader;
    use crate::db::fake::FakeStoreRepository;
    use crate::packager::fake::FakePackager;
    use crate::reconciler::ReconcilerConfig;

    fn test_lifecycle() -> (Lifecycle, Arc<FakeStoreRepository>) {
        let repo = Arc::new(FakeStoreRepository::new());
        let packager = Arc::new(FakePackager::new());
        let cluster = Arc::new(FakeClusterReader::new());
        let config = ReconcilerConfig {
            max_workers: 5,
            provisioning_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            scheduling_delay: Duration::from_millis(1),
            base_domain: "localhost".to_string(),
            role_rules: RoleRules::default(),
        };
        let reconciler = Arc::new(Reconciler::new(repo.clone(), packager.clone(), cluster, config));
        let lifecycle = Lifecycle::new(repo.clone(), packager, reconciler);
        (lifecycle, repo)
    }

    fn sample_request(name: &str) -> CreateStoreRequest {
        CreateStoreRequest {
            name: name.to_string(),
            engine: "woocommerce".to_string(),
            admin_username: "root".to_string(),
            admin_password: "P@ss!".to_string(),
            admin_email: "a@x".to_string(),
        }
    }

    #[tokio::test]
    async fn create_then_get_returns_provisioning_with_derived_fields() {
        let (lifecycle, _repo) = test_lifecycle();
        let created = lifecycle.create_store(sample_request("shop1")).await.unwrap();
        assert_eq!(created.status, "PROVISIONING");
        assert_eq!(created.namespace, format!("store-{}", created.id));
        assert_eq!(created.helm_release, created.id);

        let fetched = lifecycle.get_store(&created.id).await.unwrap();
        assert_eq!(fetched.id, created.id);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_as_conflict() {
        let (lifecycle, _repo) = test_lifecycle();
        lifecycle.create_store(sample_request("shop1")).await.unwrap();
        let err = lifecycle.create_store(sample_request("shop1")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn blank_name_is_rejected_as_validation() {
        let (lifecycle, _repo) = test_lifecycle();
        let err = lifecycle.create_store(sample_request("   ")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_engine_is_rejected_as_validation() {
        let (lifecycle, _repo) = test_lifecycle();
        let mut req = sample_request("shop1");
        req.engine = "shopify".to_string();
        let err = lifecycle.create_store(req).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn delete_missing_store_is_not_found() {
        let (lifecycle, _repo) = test_lifecycle();
        let err = lifecycle.delete_store("nonexistent").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_already_deleted_store_is_invalid_state() {
        let (lifecycle, repo) = test_lifecycle();
        let created = lifecycle.create_store(sample_request("shop1")).await.unwrap();
        repo.update_status(&created.id, StoreStatus::Deleting, StatusUpdate::default())
            .await
            .unwrap();
        repo.update_status(&created.id, StoreStatus::Deleted, StatusUpdate::default())
            .await
            .unwrap();

        let err = lifecycle.delete_store(&created.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn successful_delete_reaches_deleted_status() {
        let (lifecycle, repo) = test_lifecycle();
        let created = lifecycle.create_store(sample_request("shop1")).await.unwrap();
        let response = lifecycle.delete_store(&created.id).await.unwrap();
        assert_eq!(response.status, "DELETED");

        let stored = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, StoreStatus::Deleted);
    }

    #[tokio::test]
    async fn failed_delete_keeps_output_in_the_error_message() {
        let repo = Arc::new(FakeStoreRepository::new());
        let packager = Arc::new(FakePackager {
            statuses: Default::default(),
            install_ok: true,
            uninstall_ok: false,
        });
        let cluster = Arc::new(FakeClusterReader::new());
        let config = ReconcilerConfig {
            max_workers: 5,
            provisioning_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            scheduling_delay: Duration::from_millis(1),
            base_domain: "localhost".to_string(),
            role_rules: RoleRules::default(),
        };
        let reconciler = Arc::new(Reconciler::new(repo.clone(), packager.clone(), cluster, config));
        let lifecycle = Lifecycle::new(repo.clone(), packager, reconciler);

        let created = lifecycle.create_store(sample_request("shop1")).await.unwrap();
        let err = lifecycle.delete_store(&created.id).await.unwrap_err();
        match err {
            Error::Internal(message) => {
                assert!(message.starts_with("delete failed:"));
                assert!(message.contains("simulated uninstall failure"));
            }
            other => panic!("expected Internal error, got {other:?}"),
        }

        let stored = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, StoreStatus::Failed);
    }
}
