use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;

use crate::errors::Error;
use crate::models::{Engine, Store, StoreStatus, StatusUpdate};

/// Durable persistence for `Store` records: uniqueness, atomic status
/// transitions. Implementations return detached snapshots, never live
/// handles into a transaction.
#[async_trait]
pub trait StoreRepository: Send + Sync {
    async fn insert(&self, store: Store) -> Result<Store, Error>;
    async fn get_by_id(&self, id: &str) -> Result<Option<Store>, Error>;
    async fn get_by_name(&self, name: &str) -> Result<Option<Store>, Error>;
    async fn list(&self) -> Result<Vec<Store>, Error>;
    async fn list_by_status(&self, status: StoreStatus) -> Result<Vec<Store>, Error>;
    async fn update_status(
        &self,
        id: &str,
        status: StoreStatus,
        update: StatusUpdate,
    ) -> Result<Store, Error>;
}

pub struct PgStoreRepository {
    pool: Pool,
}

impl PgStoreRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

/// Create the `stores` table if absent. The partial unique index realizes
/// spec's "name unique across non-DELETED rows" invariant directly in SQL.
pub async fn init_schema(pool: &Pool) -> Result<(), Error> {
    let client = pool.get().await?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS stores (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                engine TEXT NOT NULL,
                namespace TEXT NOT NULL,
                release TEXT NOT NULL,
                status TEXT NOT NULL,
                failure_reason TEXT,
                store_url TEXT,
                db_root_password TEXT NOT NULL,
                db_name TEXT NOT NULL,
                db_user TEXT NOT NULL,
                db_password TEXT NOT NULL,
                admin_username TEXT NOT NULL,
                admin_password TEXT NOT NULL,
                admin_email TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            &[],
        )
        .await?;

    client
        .execute(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_stores_name_live
            ON stores (name)
            WHERE status <> 'DELETED'
            "#,
            &[],
        )
        .await?;

    tracing::info!("database schema initialized");
    Ok(())
}

fn row_to_store(row: &tokio_postgres::Row) -> Store {
    let engine_str: String = row.get("engine");
    let status_str: String = row.get("status");
    Store {
        id: row.get("id"),
        name: row.get("name"),
        engine: Engine::parse(&engine_str).expect("engine column holds a valid enum value"),
        namespace: row.get("namespace"),
        release: row.get("release"),
        status: StoreStatus::parse(&status_str).expect("status column holds a valid enum value"),
        failure_reason: row.get("failure_reason"),
        store_url: row.get("store_url"),
        db_root_password: row.get("db_root_password"),
        db_name: row.get("db_name"),
        db_user: row.get("db_user"),
        db_password: row.get("db_password"),
        admin_username: row.get("admin_username"),
        admin_password: row.get("admin_password"),
        admin_email: row.get("admin_email"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLUMNS: &str = "id, name, engine, namespace, release, status, failure_reason, \
     store_url, db_root_password, db_name, db_user, db_password, admin_username, \
     admin_password, admin_email, created_at, updated_at";

#[async_trait]
impl StoreRepository for PgStoreRepository {
    async fn insert(&self, store: Store) -> Result<Store, Error> {
        let client = self.pool.get().await?;

        let existing = client
            .query_opt(
                "SELECT 1 FROM stores WHERE name = $1 AND status <> 'DELETED'",
                &[&store.name],
            )
            .await?;
        if existing.is_some() {
            return Err(Error::Conflict(store.name));
        }

        client
            .execute(
                r#"
                INSERT INTO stores (
                    id, name, engine, namespace, release, status, failure_reason, store_url,
                    db_root_password, db_name, db_user, db_password,
                    admin_username, admin_password, admin_email,
                    created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                "#,
                &[
                    &store.id,
                    &store.name,
                    &store.engine.as_str(),
                    &store.namespace,
                    &store.release,
                    &store.status.as_str(),
                    &store.failure_reason,
                    &store.store_url,
                    &store.db_root_password,
                    &store.db_name,
                    &store.db_user,
                    &store.db_password,
                    &store.admin_username,
                    &store.admin_password,
                    &store.admin_email,
                    &store.created_at,
                    &store.updated_at,
                ],
            )
            .await?;

        Ok(store)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Store>, Error> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {SELECT_COLUMNS} FROM stores WHERE id = $1"),
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_store))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Store>, Error> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM stores WHERE name = $1 AND status <> 'DELETED'"
                ),
                &[&name],
            )
            .await?;
        Ok(row.as_ref().map(row_to_store))
    }

    async fn list(&self) -> Result<Vec<Store>, Error> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM stores ORDER BY created_at DESC"),
                &[],
            )
            .await?;
        Ok(rows.iter().map(row_to_store).collect())
    }

    async fn list_by_status(&self, status: StoreStatus) -> Result<Vec<Store>, Error> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM stores WHERE status = $1 ORDER BY created_at"
                ),
                &[&status.as_str()],
            )
            .await?;
        Ok(rows.iter().map(row_to_store).collect())
    }

    async fn update_status(
        &self,
        id: &str,
        status: StoreStatus,
        update: StatusUpdate,
    ) -> Result<Store, Error> {
        let client = self.pool.get().await?;

        let current = client
            .query_opt(
                &format!("SELECT {SELECT_COLUMNS} FROM stores WHERE id = $1"),
                &[&id],
            )
            .await?
            .map(|r| row_to_store(&r))
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if !current.status.can_transition_to(status) {
            return Err(Error::InvalidState(format!(
                "cannot transition {} from {} to {}",
                id,
                current.status.as_str(),
                status.as_str()
            )));
        }

        let failure_reason = if status == StoreStatus::Failed {
            update.failure_reason
        } else {
            None
        };
        let store_url = if status == StoreStatus::Ready {
            update.store_url
        } else {
            current.store_url.clone()
        };
        let updated_at = Utc::now();

        let row = client
            .query_one(
                &format!(
                    "UPDATE stores SET status = $2, failure_reason = $3, store_url = $4, \
                     updated_at = $5 WHERE id = $1 RETURNING {SELECT_COLUMNS}"
                ),
                &[&id, &status.as_str(), &failure_reason, &store_url, &updated_at],
            )
            .await?;

        Ok(row_to_store(&row))
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory stand-in for `PgStoreRepository`, used by reconciler and
    /// lifecycle tests so they never need a live Postgres connection.
    #[derive(Default)]
    pub struct FakeStoreRepository {
        rows: Mutex<HashMap<String, Store>>,
    }

    impl FakeStoreRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, store: Store) {
            self.rows.lock().unwrap().insert(store.id.clone(), store);
        }
    }

    #[async_trait]
    impl StoreRepository for FakeStoreRepository {
        async fn insert(&self, store: Store) -> Result<Store, Error> {
            let mut rows = self.rows.lock().unwrap();
            let name_taken = rows
                .values()
                .any(|s| s.name == store.name && s.status != StoreStatus::Deleted);
            if name_taken {
                return Err(Error::Conflict(store.name));
            }
            rows.insert(store.id.clone(), store.clone());
            Ok(store)
        }

        async fn get_by_id(&self, id: &str) -> Result<Option<Store>, Error> {
            Ok(self.rows.lock().unwrap().get(id).cloned())
        }

        async fn get_by_name(&self, name: &str) -> Result<Option<Store>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .find(|s| s.name == name && s.status != StoreStatus::Deleted)
                .cloned())
        }

        async fn list(&self) -> Result<Vec<Store>, Error> {
            let mut out: Vec<Store> = self.rows.lock().unwrap().values().cloned().collect();
            out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(out)
        }

        async fn list_by_status(&self, status: StoreStatus) -> Result<Vec<Store>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.status == status)
                .cloned()
                .collect())
        }

        async fn update_status(
            &self,
            id: &str,
            status: StoreStatus,
            update: StatusUpdate,
        ) -> Result<Store, Error> {
            let mut rows = self.rows.lock().unwrap();
            let store = rows
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            if !store.status.can_transition_to(status) {
                return Err(Error::InvalidState(format!(
                    "cannot transition {} from {} to {}",
                    id,
                    store.status.as_str(),
                    status.as_str()
                )));
            }
            store.status = status;
            store.failure_reason = if status == StoreStatus::Failed {
                update.failure_reason
            } else {
                None
            };
            if status == StoreStatus::Ready {
                store.store_url = update.store_url;
            }
            store.updated_at = Utc::now();
            Ok(store.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeStoreRepository;
    use super::*;

    fn sample_store(id: &str, name: &str) -> Store {
        let now = Utc::now();
        Store {
            id: id.to_string(),
            name: name.to_string(),
            engine: Engine::Woocommerce,
            namespace: format!("store-{id}"),
            release: id.to_string(),
            status: StoreStatus::Provisioning,
            failure_reason: None,
            store_url: None,
            db_root_password: "x".into(),
            db_name: format!("store_{name}_db"),
            db_user: format!("user_{name}"),
            db_password: "x".into(),
            admin_username: "root".into(),
            admin_password: "secret".into(),
            admin_email: "a@x".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_name_rejected_across_non_deleted_rows() {
        let repo = FakeStoreRepository::new();
        repo.insert(sample_store("shop1-aaaa1111", "shop1"))
            .await
            .unwrap();
        let err = repo
            .insert(sample_store("shop1-bbbb2222", "shop1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn name_reusable_once_prior_row_is_deleted() {
        let repo = FakeStoreRepository::new();
        let s = repo.insert(sample_store("shop1-aaaa1111", "shop1")).await.unwrap();
        repo.update_status(&s.id, StoreStatus::Deleting, StatusUpdate::default())
            .await
            .unwrap();
        repo.update_status(&s.id, StoreStatus::Deleted, StatusUpdate::default())
            .await
            .unwrap();
        repo.insert(sample_store("shop1-bbbb2222", "shop1"))
            .await
            .expect("name should be free again");
    }

    #[tokio::test]
    async fn illegal_transition_is_refused() {
        let repo = FakeStoreRepository::new();
        let s = repo.insert(sample_store("shop1-aaaa1111", "shop1")).await.unwrap();
        repo.update_status(&s.id, StoreStatus::Ready, StatusUpdate::default())
            .await
            .unwrap();
        let err = repo
            .update_status(&s.id, StoreStatus::Provisioning, StatusUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn failure_reason_cleared_outside_failed_status() {
        let repo = FakeStoreRepository::new();
        let s = repo.insert(sample_store("shop1-aaaa1111", "shop1")).await.unwrap();
        let failed = repo
            .update_status(
                &s.id,
                StoreStatus::Failed,
                StatusUpdate {
                    failure_reason: Some("boom".into()),
                    store_url: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some("boom"));

        let deleting = repo
            .update_status(&s.id, StoreStatus::Deleting, StatusUpdate::default())
            .await
            .unwrap();
        assert_eq!(deleting.failure_reason, None);
    }
}
