use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Waiting { reason: Option<String> },
    Terminated { exit_code: i32 },
}

#[derive(Debug, Clone)]
pub struct ContainerSnapshot {
    pub ready: bool,
    pub restart_count: i32,
    pub state: ContainerState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct PodSnapshot {
    pub name: String,
    pub phase: PodPhase,
    pub containers: Vec<ContainerSnapshot>,
}

#[derive(Debug, Clone)]
pub struct IngressSnapshot {
    pub host: String,
    pub tls: bool,
}

/// Read-only adapter over the orchestrator API. Errors other than "not
/// found" propagate; "not found" maps to an explicit absent result. Never
/// caches.
#[async_trait]
pub trait ClusterReader: Send + Sync {
    async fn namespace_exists(&self, ns: &str) -> Result<bool, kube::Error>;
    async fn list_pods(&self, ns: &str) -> Result<Vec<PodSnapshot>, kube::Error>;
    async fn get_ingress_host(
        &self,
        ns: &str,
        ingress_name: &str,
    ) -> Result<Option<IngressSnapshot>, kube::Error>;
}

pub struct KubeClusterReader {
    client: Client,
}

impl KubeClusterReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn phase_of(pod: &Pod) -> PodPhase {
    match pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
    {
        "Pending" => PodPhase::Pending,
        "Running" => PodPhase::Running,
        "Succeeded" => PodPhase::Succeeded,
        "Failed" => PodPhase::Failed,
        _ => PodPhase::Unknown,
    }
}

fn containers_of(pod: &Pod) -> Vec<ContainerSnapshot> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    let Some(statuses) = status.container_statuses.as_ref() else {
        return Vec::new();
    };
    statuses
        .iter()
        .map(|c| {
            let state = match c.state.as_ref() {
                Some(s) if s.running.is_some() => ContainerState::Running,
                Some(s) if s.terminated.is_some() => ContainerState::Terminated {
                    exit_code: s.terminated.as_ref().unwrap().exit_code,
                },
                Some(s) if s.waiting.is_some() => ContainerState::Waiting {
                    reason: s.waiting.as_ref().unwrap().reason.clone(),
                },
                _ => ContainerState::Waiting { reason: None },
            };
            ContainerSnapshot {
                ready: c.ready,
                restart_count: c.restart_count,
                state,
            }
        })
        .collect()
}

#[async_trait]
impl ClusterReader for KubeClusterReader {
    async fn namespace_exists(&self, ns: &str) -> Result<bool, kube::Error> {
        use k8s_openapi::api::core::v1::Namespace;
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.get(ns).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_pods(&self, ns: &str) -> Result<Vec<PodSnapshot>, kube::Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        let list = match pods.list(&Default::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(list
            .items
            .iter()
            .map(|pod| PodSnapshot {
                name: pod.metadata.name.clone().unwrap_or_default(),
                phase: phase_of(pod),
                containers: containers_of(pod),
            })
            .collect())
    }

    async fn get_ingress_host(
        &self,
        ns: &str,
        ingress_name: &str,
    ) -> Result<Option<IngressSnapshot>, kube::Error> {
        let ingresses: Api<Ingress> = Api::namespaced(self.client.clone(), ns);
        let ingress = match ingresses.get(ingress_name).await {
            Ok(ingress) => ingress,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(spec) = ingress.spec.as_ref() else {
            return Ok(None);
        };
        let Some(host) = spec
            .rules
            .as_ref()
            .and_then(|rules| rules.first())
            .and_then(|rule| rule.host.clone())
        else {
            return Ok(None);
        };
        let tls = spec.tls.as_ref().is_some_and(|tls| !tls.is_empty());
        Ok(Some(IngressSnapshot { host, tls }))
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeClusterReader {
        pub pods: Mutex<HashMap<String, Vec<PodSnapshot>>>,
        // Keyed by (namespace, ingress_name) so tests catch callers that
        // look up the wrong ingress resource name, not just the wrong
        // namespace.
        pub ingresses: Mutex<HashMap<(String, String), IngressSnapshot>>,
    }

    impl FakeClusterReader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_pods(&self, ns: &str, pods: Vec<PodSnapshot>) {
            self.pods.lock().unwrap().insert(ns.to_string(), pods);
        }

        pub fn set_ingress(&self, ns: &str, ingress_name: &str, ingress: IngressSnapshot) {
            self.ingresses
                .lock()
                .unwrap()
                .insert((ns.to_string(), ingress_name.to_string()), ingress);
        }
    }

    #[async_trait]
    impl ClusterReader for FakeClusterReader {
        async fn namespace_exists(&self, ns: &str) -> Result<bool, kube::Error> {
            Ok(self.pods.lock().unwrap().contains_key(ns))
        }

        async fn list_pods(&self, ns: &str) -> Result<Vec<PodSnapshot>, kube::Error> {
            Ok(self.pods.lock().unwrap().get(ns).cloned().unwrap_or_default())
        }

        async fn get_ingress_host(
            &self,
            ns: &str,
            ingress_name: &str,
        ) -> Result<Option<IngressSnapshot>, kube::Error> {
            Ok(self
                .ingresses
                .lock()
                .unwrap()
                .get(&(ns.to_string(), ingress_name.to_string()))
                .cloned())
        }
    }
}
