use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);
const UNINSTALL_TIMEOUT: Duration = Duration::from_secs(120);
const STATUS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub ok: bool,
    pub output: String,
}

/// Invokes the external packaging tool (Helm) as a subprocess. Each method
/// captures stdout/stderr and reaps the child on every exit path.
#[async_trait]
pub trait Packager: Send + Sync {
    async fn install(
        &self,
        release: &str,
        namespace: &str,
        values: &BTreeMap<String, String>,
    ) -> InstallOutcome;
    async fn uninstall(&self, release: &str, namespace: &str) -> InstallOutcome;
    async fn status(&self, release: &str, namespace: &str) -> Option<String>;
}

pub struct HelmPackager {
    binary: String,
    chart_path: String,
    values_file: String,
    env_values_file: String,
}

impl HelmPackager {
    pub fn new(chart_path: String, values_file: String, env_values_file: String) -> Self {
        Self {
            binary: "helm".to_string(),
            chart_path,
            values_file,
            env_values_file,
        }
    }

    /// Confirms the packaging tool binary is reachable and the chart
    /// directory actually contains a manifest. Both are fatal on failure:
    /// the core refuses to serve with a misconfigured packager.
    pub async fn validate_startup(&self) -> anyhow::Result<()> {
        let manifest = Path::new(&self.chart_path).join("Chart.yaml");
        if !manifest.exists() {
            anyhow::bail!(
                "helm chart manifest not found at {}",
                manifest.display()
            );
        }
        let output = Command::new(&self.binary)
            .arg("version")
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("helm binary unreachable: {e}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "helm binary reported failure: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    async fn run(&self, args: Vec<String>, budget: Duration, timeout_message: &str) -> InstallOutcome {
        let run = Command::new(&self.binary).args(&args).output();
        match timeout(budget, run).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                InstallOutcome {
                    ok: output.status.success(),
                    output: combined,
                }
            }
            Ok(Err(e)) => InstallOutcome {
                ok: false,
                output: format!("failed to spawn helm: {e}"),
            },
            Err(_) => InstallOutcome {
                ok: false,
                output: timeout_message.to_string(),
            },
        }
    }
}

#[async_trait]
impl Packager for HelmPackager {
    async fn install(
        &self,
        release: &str,
        namespace: &str,
        values: &BTreeMap<String, String>,
    ) -> InstallOutcome {
        let values_path = format!("{}/{}", self.chart_path, self.values_file);
        let env_values_path = format!("{}/{}", self.chart_path, self.env_values_file);

        let mut args = vec![
            "install".to_string(),
            release.to_string(),
            self.chart_path.clone(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--create-namespace".to_string(),
            "-f".to_string(),
            values_path,
            "-f".to_string(),
            env_values_path,
        ];
        for (key, value) in values {
            args.push("--set".to_string());
            args.push(format!("{key}={value}"));
        }

        self.run(args, INSTALL_TIMEOUT, "install timed out").await
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> InstallOutcome {
        let args = vec![
            "uninstall".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        self.run(args, UNINSTALL_TIMEOUT, "uninstall timed out").await
    }

    async fn status(&self, release: &str, namespace: &str) -> Option<String> {
        let args = vec![
            "status".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let outcome = self.run(args, STATUS_TIMEOUT, "status check timed out").await;
        if !outcome.ok {
            return None;
        }
        let parsed: serde_json::Value = serde_json::from_str(&outcome.output).ok()?;
        parsed
            .get("info")
            .and_then(|info| info.get("status"))
            .and_then(|status| status.as_str())
            .map(|s| s.to_string())
    }
}

/// Builds the dotted-key values map the packaging tool receives, per the
/// known keys the core sets. Unknown keys passed in separately would pass
/// through untouched, but the core only ever sets this fixed set.
pub fn build_values(store: &crate::models::Store, base_domain: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    values.insert("store.id".to_string(), store.id.clone());
    values.insert("store.name".to_string(), store.name.clone());
    values.insert("store.namespace".to_string(), store.namespace.clone());
    values.insert("store.engine".to_string(), store.engine.as_str().to_string());
    values.insert(
        "store.domain".to_string(),
        format!("{}.{}", store.name, base_domain),
    );
    values.insert(
        "secrets.database.rootPassword".to_string(),
        store.db_root_password.clone(),
    );
    values.insert("secrets.database.name".to_string(), store.db_name.clone());
    values.insert("secrets.database.username".to_string(), store.db_user.clone());
    values.insert(
        "secrets.database.password".to_string(),
        store.db_password.clone(),
    );
    values.insert("secrets.admin.username".to_string(), store.admin_username.clone());
    values.insert(
        "secrets.admin.password".to_string(),
        store.admin_password.clone(),
    );
    values.insert("secrets.admin.email".to_string(), store.admin_email.clone());
    values
}

#[cfg(test)]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakePackager {
        pub statuses: Mutex<HashMap<String, String>>,
        pub install_ok: bool,
        pub uninstall_ok: bool,
    }

    impl FakePackager {
        pub fn new() -> Self {
            Self {
                statuses: Mutex::new(HashMap::new()),
                install_ok: true,
                uninstall_ok: true,
            }
        }

        pub fn with_existing_release(release: &str, status: &str) -> Self {
            let mut statuses = HashMap::new();
            statuses.insert(release.to_string(), status.to_string());
            Self {
                statuses: Mutex::new(statuses),
                install_ok: true,
                uninstall_ok: true,
            }
        }

        pub fn failing_install() -> Self {
            Self {
                statuses: Mutex::new(HashMap::new()),
                install_ok: false,
                uninstall_ok: true,
            }
        }
    }

    #[async_trait]
    impl Packager for FakePackager {
        async fn install(
            &self,
            release: &str,
            _namespace: &str,
            _values: &BTreeMap<String, String>,
        ) -> InstallOutcome {
            if self.install_ok {
                self.statuses
                    .lock()
                    .unwrap()
                    .insert(release.to_string(), "deployed".to_string());
                InstallOutcome {
                    ok: true,
                    output: "installed".to_string(),
                }
            } else {
                InstallOutcome {
                    ok: false,
                    output: "simulated install failure".to_string(),
                }
            }
        }

        async fn uninstall(&self, release: &str, _namespace: &str) -> InstallOutcome {
            self.statuses.lock().unwrap().remove(release);
            InstallOutcome {
                ok: self.uninstall_ok,
                output: if self.uninstall_ok {
                    "uninstalled".to_string()
                } else {
                    "simulated uninstall failure".to_string()
                },
            }
        }

        async fn status(&self, release: &str, _namespace: &str) -> Option<String> {
            self.statuses.lock().unwrap().get(release).cloned()
        }
    }
}
