//! Worker pool that drives a store from `PROVISIONING` to a terminal
//! state. Idempotent and crash-safe: `Shutdown` never forces cancellation,
//! so a half-finished task's store simply remains `PROVISIONING` and is
//! picked up by `resume_in_flight` on the next start.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::classifier::{RoleRules, Verdict, classify};
use crate::cluster::ClusterReader;
use crate::db::StoreRepository;
use crate::errors::Error;
use crate::models::{StatusUpdate, Store, StoreStatus};
use crate::packager::{Packager, build_values};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub max_workers: usize,
    pub provisioning_timeout: Duration,
    pub poll_interval: Duration,
    pub scheduling_delay: Duration,
    pub base_domain: String,
    pub role_rules: RoleRules,
}

pub struct Reconciler {
    repo: Arc<dyn StoreRepository>,
    packager: Arc<dyn Packager>,
    cluster: Arc<dyn ClusterReader>,
    config: ReconcilerConfig,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accepting: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn StoreRepository>,
        packager: Arc<dyn Packager>,
        cluster: Arc<dyn ClusterReader>,
        config: ReconcilerConfig,
    ) -> Self {
        let max_workers = config.max_workers.max(1);
        Self {
            repo,
            packager,
            cluster,
            config,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: Arc::new(Mutex::new(Vec::new())),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Enqueues `store_id` for provisioning. Non-blocking from the
    /// caller's perspective; a submission for an ID already in flight is
    /// dropped with a warning.
    pub async fn submit(&self, store_id: String) {
        if !self.accepting.load(Ordering::SeqCst) {
            tracing::warn!(store_id = %store_id, "reconciler is shutting down, refusing submission");
            return;
        }

        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(store_id.clone()) {
                tracing::warn!(store_id = %store_id, "task already in flight for store, dropping duplicate submission");
                return;
            }
        }

        let repo = self.repo.clone();
        let packager = self.packager.clone();
        let cluster = self.cluster.clone();
        let config = self.config.clone();
        let semaphore = self.semaphore.clone();
        let in_flight_map = self.in_flight.clone();
        let id_for_task = store_id.clone();

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let outcome = AssertUnwindSafe(run_task(&*repo, &*packager, &*cluster, &config, &id_for_task))
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                let message = panic_message(&panic);
                tracing::error!(store_id = %id_for_task, error = %message, "unexpected error during reconciliation");
                let _ = repo
                    .update_status(
                        &id_for_task,
                        StoreStatus::Failed,
                        StatusUpdate {
                            failure_reason: Some(format!("unexpected error: {message}")),
                            store_url: None,
                        },
                    )
                    .await;
            }
            in_flight_map.lock().await.remove(&id_for_task);
        });

        self.tasks.lock().await.push(handle);
    }

    /// Enumerates `PROVISIONING` rows and resubmits each. Idempotent: a
    /// store already in flight is simply dropped by `submit`'s
    /// de-duplication, so calling this twice submits each store at most
    /// once per in-flight window.
    pub async fn resume_in_flight(&self) -> Result<(), Error> {
        let rows = self.repo.list_by_status(StoreStatus::Provisioning).await?;
        for store in rows {
            let existing = self.packager.status(&store.release, &store.namespace).await;
            tracing::info!(
                store_id = %store.id,
                release_exists = existing.is_some(),
                "resuming in-flight provisioning after restart"
            );
            self.submit(store.id).await;
        }
        Ok(())
    }

    /// Stops accepting new submissions and waits for active tasks to
    /// reach their next completion point. No forced cancellation.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn ingress_name(store: &Store) -> String {
    format!("{}-ingress", store.release)
}

async fn commit_failed(repo: &dyn StoreRepository, store_id: &str, reason: String) {
    tracing::warn!(store_id = %store_id, reason = %reason, "provisioning failed");
    if let Err(e) = repo
        .update_status(
            store_id,
            StoreStatus::Failed,
            StatusUpdate {
                failure_reason: Some(reason),
                store_url: None,
            },
        )
        .await
    {
        tracing::error!(store_id = %store_id, error = %e, "failed to persist terminal FAILED status");
    }
}

async fn commit_ready(repo: &dyn StoreRepository, store_id: &str, url: String) {
    tracing::info!(store_id = %store_id, store_url = %url, "provisioning succeeded");
    if let Err(e) = repo
        .update_status(
            store_id,
            StoreStatus::Ready,
            StatusUpdate {
                failure_reason: None,
                store_url: Some(url),
            },
        )
        .await
    {
        tracing::error!(store_id = %store_id, error = %e, "failed to persist terminal READY status");
    }
}

async fn run_task(
    repo: &dyn StoreRepository,
    packager: &dyn Packager,
    cluster: &dyn ClusterReader,
    config: &ReconcilerConfig,
    store_id: &str,
) {
    let store = match repo.get_by_id(store_id).await {
        Ok(Some(store)) => store,
        Ok(None) => {
            tracing::warn!(store_id = %store_id, "store no longer exists, skipping reconcile");
            return;
        }
        Err(e) => {
            tracing::error!(store_id = %store_id, error = %e, "failed to load store for reconcile");
            return;
        }
    };

    if store.status != StoreStatus::Provisioning {
        tracing::info!(
            store_id = %store_id,
            status = store.status.as_str(),
            "store is no longer provisioning, another worker or the delete path owns it"
        );
        return;
    }

    let existing_status = packager.status(&store.release, &store.namespace).await;
    if existing_status.is_none() {
        let values = build_values(&store, &config.base_domain);
        let outcome = packager.install(&store.release, &store.namespace, &values).await;
        if !outcome.ok {
            commit_failed(repo, store_id, format!("install failed: {}", outcome.output)).await;
            return;
        }
        tokio::time::sleep(config.scheduling_delay).await;
    } else {
        tracing::info!(store_id = %store_id, release_status = ?existing_status, "release already exists, skipping install");
    }

    let start = Instant::now();
    let ingress_name = ingress_name(&store);

    loop {
        let verdict = match cluster.list_pods(&store.namespace).await {
            Ok(pods) => {
                let ingress = match cluster.get_ingress_host(&store.namespace, &ingress_name).await {
                    Ok(ingress) => ingress,
                    Err(e) => {
                        tracing::warn!(store_id = %store_id, error = %e, "transient cluster error reading ingress, treating as in-progress");
                        None
                    }
                };
                classify(&pods, ingress.as_ref(), &config.role_rules)
            }
            Err(e) => {
                tracing::warn!(store_id = %store_id, error = %e, "transient cluster error reading pods, treating as in-progress");
                Verdict::InProgress(format!("transient cluster error: {e}"))
            }
        };

        match verdict {
            Verdict::Ready(url) => {
                commit_ready(repo, store_id, url).await;
                return;
            }
            Verdict::Failed(reason) => {
                commit_failed(repo, store_id, reason).await;
                return;
            }
            Verdict::InProgress(status) => {
                if start.elapsed() > config.provisioning_timeout {
                    commit_failed(
                        repo,
                        store_id,
                        format!("timed out after {}s", config.provisioning_timeout.as_secs()),
                    )
                    .await;
                    return;
                }
                tracing::debug!(store_id = %store_id, status = %status, "still provisioning");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }
}
