//! Pure function from a cluster snapshot to a readiness verdict. Kept free
//! of any I/O so it can be the unit-test heart of the system.

use crate::cluster::{ContainerState, IngressSnapshot, PodPhase, PodSnapshot};

const BAD_WAITING_REASONS: &[&str] = &["ImagePullBackOff", "ErrImagePull", "CrashLoopBackOff"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ready(String),
    InProgress(String),
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Database,
    App,
    SetupJob,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::Database => "Database",
            Role::App => "WordPress",
            Role::SetupJob => "Setup",
        }
    }
}

/// The role-recognition table: which name substring identifies which role
/// for a given engine. Closed enumeration, extensible by configuration —
/// a future engine adds a `RoleRules` value rather than new match arms.
#[derive(Debug, Clone)]
pub struct RoleRules {
    pub database_substr: String,
    pub app_substr: String,
    pub setup_job_substr: String,
}

impl Default for RoleRules {
    fn default() -> Self {
        Self {
            database_substr: "mysql".to_string(),
            app_substr: "wordpress".to_string(),
            setup_job_substr: "woocommerce-setup".to_string(),
        }
    }
}

fn role_of(name: &str, rules: &RoleRules) -> Option<Role> {
    if name.contains(&rules.setup_job_substr) {
        Some(Role::SetupJob)
    } else if name.contains(&rules.database_substr) {
        Some(Role::Database)
    } else if name.contains(&rules.app_substr) {
        Some(Role::App)
    } else {
        None
    }
}

fn service_failure(pods: &[&PodSnapshot], role: Role) -> Option<String> {
    for pod in pods {
        for container in &pod.containers {
            match &container.state {
                ContainerState::Waiting { reason: Some(reason) }
                    if BAD_WAITING_REASONS.contains(&reason.as_str()) =>
                {
                    return Some(format!("{}: {}", role.label(), reason));
                }
                ContainerState::Terminated { exit_code } if *exit_code != 0 => {
                    return Some(format!("{}: exit code {}", role.label(), exit_code));
                }
                _ => {}
            }
        }
    }
    None
}

/// Setup-job failure is narrower than database/app failure: a waiting
/// container (including the bad-waiting-reason cases) is still in-progress
/// for a job. Only a non-zero exit is terminal.
fn job_failure(pods: &[&PodSnapshot], role: Role) -> Option<String> {
    for pod in pods {
        for container in &pod.containers {
            if let ContainerState::Terminated { exit_code } = &container.state {
                if *exit_code != 0 {
                    return Some(format!("{}: exit code {}", role.label(), exit_code));
                }
            }
        }
    }
    None
}

fn service_ready(pods: &[&PodSnapshot]) -> bool {
    !pods.is_empty()
        && pods.iter().all(|pod| {
            pod.phase == PodPhase::Running && pod.containers.iter().all(|c| c.ready)
        })
}

fn job_success(pods: &[&PodSnapshot]) -> bool {
    let zero_exits = pods
        .iter()
        .flat_map(|pod| pod.containers.iter())
        .filter(|c| matches!(c.state, ContainerState::Terminated { exit_code: 0 }))
        .count();
    zero_exits == 1
}

fn describe_state(state: &ContainerState) -> String {
    match state {
        ContainerState::Running => "Running".to_string(),
        ContainerState::Waiting { reason: Some(r) } => format!("Waiting({r})"),
        ContainerState::Waiting { reason: None } => "Waiting".to_string(),
        ContainerState::Terminated { exit_code } => format!("Terminated(exit={exit_code})"),
    }
}

fn human_status(pods: &[PodSnapshot]) -> String {
    if pods.is_empty() {
        return "no pods found yet".to_string();
    }
    pods.iter()
        .map(|pod| {
            let phase = match pod.phase {
                PodPhase::Pending => "Pending",
                PodPhase::Running => "Running",
                PodPhase::Succeeded => "Succeeded",
                PodPhase::Failed => "Failed",
                PodPhase::Unknown => "Unknown",
            };
            let containers: Vec<String> = pod.containers.iter().map(|c| describe_state(&c.state)).collect();
            if containers.is_empty() {
                format!("{}: {}", pod.name, phase)
            } else {
                format!("{}: {} [{}]", pod.name, phase, containers.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Classifies a snapshot of a store's namespace into a readiness verdict.
/// Failed wins over any other state (tie-break #1, checked database → app
/// → setup-job). Otherwise Ready requires all three roles' success
/// predicates and a resolvable ingress host; a missing ingress downgrades
/// to InProgress rather than Failed.
pub fn classify(pods: &[PodSnapshot], ingress: Option<&IngressSnapshot>, rules: &RoleRules) -> Verdict {
    let mut db_pods = Vec::new();
    let mut app_pods = Vec::new();
    let mut job_pods = Vec::new();

    for pod in pods {
        match role_of(&pod.name, rules) {
            Some(Role::Database) => db_pods.push(pod),
            Some(Role::App) => app_pods.push(pod),
            Some(Role::SetupJob) => job_pods.push(pod),
            None => {}
        }
    }

    if let Some(reason) = service_failure(&db_pods, Role::Database) {
        return Verdict::Failed(reason);
    }
    if let Some(reason) = service_failure(&app_pods, Role::App) {
        return Verdict::Failed(reason);
    }
    if let Some(reason) = job_failure(&job_pods, Role::SetupJob) {
        return Verdict::Failed(reason);
    }

    let ready = service_ready(&db_pods) && service_ready(&app_pods) && job_success(&job_pods);
    if ready {
        if let Some(ingress) = ingress {
            let scheme = if ingress.tls { "https" } else { "http" };
            return Verdict::Ready(format!("{scheme}://{}", ingress.host));
        }
        return Verdict::InProgress(human_status(pods));
    }

    Verdict::InProgress(human_status(pods))
}
