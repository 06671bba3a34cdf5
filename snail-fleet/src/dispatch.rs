//! Playbook dispatch.
//!
//! Bulk remote work (running commands, installing and configuring
//! snail-core) is delegated to `ansible-playbook`, which finds the VMs via
//! the dynamic inventory. Output streams straight to the terminal and the
//! exit status is the only success signal.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, instrument, warn};

use crate::config::HarnessConfig;
use crate::error::{FleetError, Result};

/// One playbook run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybookRequest {
    /// File name under the playbooks directory
    pub playbook: String,
    pub extra_vars: Map<String, Value>,
    /// Ansible `--limit` expression
    pub limit: Option<String>,
    pub verbose: bool,
}

impl PlaybookRequest {
    /// Request for a playbook by name, adding `.yaml` when there is no
    /// YAML extension.
    pub fn named(name: &str) -> Self {
        let playbook = if name.ends_with(".yaml") || name.ends_with(".yml") {
            name.to_string()
        } else {
            format!("{}.yaml", name)
        };

        Self {
            playbook,
            ..Default::default()
        }
    }

    /// Run a shell command on every host.
    pub fn run_command(cmd: &str, run_as_root: bool, ignore_errors: bool) -> Self {
        Self::named("run-command")
            .with_var("cmd", cmd)
            .with_var("run_as_root", run_as_root)
            .with_var("ignore_errors", ignore_errors)
    }

    /// `snail run`, optionally restricted to some collectors.
    pub fn run_snail(collectors: &[String]) -> Self {
        let request = Self::named("run-snail");
        if collectors.is_empty() {
            request
        } else {
            request.with_var("snail_collectors", collectors.to_vec())
        }
    }

    /// Update snail-core to the latest version.
    pub fn update(force_reinstall: bool) -> Self {
        let request = Self::named("update-snail");
        if force_reinstall {
            request.with_var("force_reinstall", true)
        } else {
            request
        }
    }

    /// Rewrite snail-core's configuration. Unset values are left alone.
    pub fn configure(api_endpoint: Option<&str>, api_key: Option<&str>, log_level: Option<&str>) -> Self {
        let mut request = Self::named("configure");
        if let Some(endpoint) = api_endpoint {
            request = request.with_var("snail_api_endpoint", endpoint);
        }
        if let Some(key) = api_key {
            request = request.with_var("snail_api_key", key);
        }
        if let Some(level) = log_level {
            request = request.with_var("snail_log_level", level);
        }
        request
    }

    pub fn status() -> Self {
        Self::named("status")
    }

    pub fn cloud_init_status() -> Self {
        Self::named("run-command").with_var("cmd", "cloud-init status --long")
    }

    pub fn with_var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra_vars.insert(key.to_string(), value.into());
        self
    }

    pub fn with_extra_vars(mut self, vars: Map<String, Value>) -> Self {
        self.extra_vars.extend(vars);
        self
    }

    pub fn with_limit(mut self, limit: Option<String>) -> Self {
        self.limit = limit.filter(|l| !l.is_empty());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Runs playbooks with `ansible-playbook`.
#[derive(Debug, Clone)]
pub struct PlaybookDispatcher {
    program: String,
    playbooks_dir: PathBuf,
    ansible_dir: PathBuf,
}

impl PlaybookDispatcher {
    pub fn new(
        program: impl Into<String>,
        playbooks_dir: impl Into<PathBuf>,
        ansible_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            playbooks_dir: playbooks_dir.into(),
            ansible_dir: ansible_dir.into(),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            config.ansible.playbook_command.clone(),
            config.playbooks_dir(),
            config.ansible_dir(),
        )
    }

    pub fn playbooks_dir(&self) -> &Path {
        &self.playbooks_dir
    }

    /// Arguments passed after the program name.
    pub fn build_args(&self, request: &PlaybookRequest) -> Result<Vec<String>> {
        let mut args = vec![self
            .playbooks_dir
            .join(&request.playbook)
            .display()
            .to_string()];

        if !request.extra_vars.is_empty() {
            args.push("-e".to_string());
            args.push(serde_json::to_string(&request.extra_vars)?);
        }

        if let Some(limit) = &request.limit {
            args.push("--limit".to_string());
            args.push(limit.clone());
        }

        if request.verbose {
            args.push("-v".to_string());
        }

        Ok(args)
    }

    /// Run the playbook. `Ok(false)` means it ran and reported failure.
    #[instrument(skip(self, request), fields(playbook = %request.playbook, limit = ?request.limit))]
    pub async fn dispatch(&self, request: &PlaybookRequest) -> Result<bool> {
        let path = self.playbooks_dir.join(&request.playbook);
        if !path.exists() {
            return Err(FleetError::PlaybookNotFound(path));
        }

        let args = self.build_args(request)?;
        info!(program = %self.program, "Running playbook");

        let status = Command::new(&self.program)
            .args(&args)
            .current_dir(&self.ansible_dir)
            .status()
            .await?;

        if !status.success() {
            warn!(code = ?status.code(), "Playbook reported failure");
        }
        Ok(status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(program: &str, dir: &Path) -> PlaybookDispatcher {
        PlaybookDispatcher::new(program, dir, dir)
    }

    #[test]
    fn test_named_appends_extension() {
        assert_eq!(PlaybookRequest::named("site").playbook, "site.yaml");
        assert_eq!(PlaybookRequest::named("site.yml").playbook, "site.yml");
        assert_eq!(PlaybookRequest::named("site.yaml").playbook, "site.yaml");
    }

    #[test]
    fn test_run_command_vars() {
        let request = PlaybookRequest::run_command("uptime", false, true);

        assert_eq!(request.playbook, "run-command.yaml");
        assert_eq!(request.extra_vars["cmd"], "uptime");
        assert_eq!(request.extra_vars["run_as_root"], false);
        assert_eq!(request.extra_vars["ignore_errors"], true);
    }

    #[test]
    fn test_optional_vars_are_omitted() {
        assert!(PlaybookRequest::update(false).extra_vars.is_empty());
        assert!(PlaybookRequest::run_snail(&[]).extra_vars.is_empty());
        assert!(PlaybookRequest::configure(None, None, None).extra_vars.is_empty());

        let configure = PlaybookRequest::configure(Some("https://api.example"), None, Some("DEBUG"));
        assert_eq!(configure.extra_vars.len(), 2);
        assert_eq!(configure.extra_vars["snail_log_level"], "DEBUG");
    }

    #[test]
    fn test_build_args() {
        let dir = Path::new("/srv/ansible/playbooks");
        let dispatcher = dispatcher("ansible-playbook", dir);

        let bare = dispatcher.build_args(&PlaybookRequest::status()).unwrap();
        assert_eq!(bare, vec!["/srv/ansible/playbooks/status.yaml"]);

        let request = PlaybookRequest::run_snail(&["cpu".to_string()])
            .with_limit(Some("snail-test-fedora-42-1,snail-test-fedora-42-2".to_string()))
            .with_verbose(true);
        let args = dispatcher.build_args(&request).unwrap();
        assert_eq!(
            args,
            vec![
                "/srv/ansible/playbooks/run-snail.yaml",
                "-e",
                r#"{"snail_collectors":["cpu"]}"#,
                "--limit",
                "snail-test-fedora-42-1,snail-test-fedora-42-2",
                "-v",
            ]
        );
    }

    #[test]
    fn test_empty_limit_is_dropped() {
        let request = PlaybookRequest::status().with_limit(Some(String::new()));
        assert_eq!(request.limit, None);
    }

    #[tokio::test]
    async fn test_missing_playbook_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = dispatcher("true", dir.path())
            .dispatch(&PlaybookRequest::status())
            .await;

        assert!(matches!(result, Err(FleetError::PlaybookNotFound(_))));
    }

    #[tokio::test]
    async fn test_exit_status_is_success_signal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("status.yaml"), "- hosts: all\n").unwrap();

        let ok = dispatcher("true", dir.path())
            .dispatch(&PlaybookRequest::status())
            .await
            .unwrap();
        assert!(ok);

        let failed = dispatcher("false", dir.path())
            .dispatch(&PlaybookRequest::status())
            .await
            .unwrap();
        assert!(!failed);
    }
}
