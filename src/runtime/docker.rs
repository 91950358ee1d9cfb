//! Docker CLI runtime driver
//!
//! Drives the container CLI through `tokio::process::Command`. Listing uses
//! the structured `--format '{{json .}}'` mode exclusively; a line that does
//! not parse is a `RuntimeQuery` error rather than an empty result, because a
//! silently empty listing would let orphaned workers accumulate undetected.

use crate::error::{Error, Result};
use crate::runtime::{ContainerRuntime, LaunchSpec, WorkerRecord, WorkerState};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

/// Container runtime backed by the docker CLI (or a compatible drop-in)
pub struct DockerRuntime {
    cli: String,
}

/// One line of `ps --format '{{json .}}'` output
#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "State")]
    state: String,
}

impl DockerRuntime {
    /// Create a driver for the given CLI binary name.
    pub fn new(cli: impl Into<String>) -> Self {
        Self { cli: cli.into() }
    }

    async fn output(&self, args: &[String]) -> Result<std::process::Output> {
        Command::new(&self.cli)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::RuntimeQuery(format!("spawn {}: {}", self.cli, e)))
    }

    /// Tolerates "no such container" so stop/remove stay idempotent.
    async fn run_idempotent(&self, subcommand: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut args = vec![subcommand.to_string()];
        args.extend(ids.iter().cloned());
        let output = self.output(&args).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_ascii_lowercase().contains("no such container") {
            return Ok(());
        }
        Err(Error::RuntimeQuery(format!(
            "{} {} failed: {}",
            self.cli,
            subcommand,
            stderr.trim()
        )))
    }

    fn parse_listing(stdout: &str, name_prefix: &str) -> Result<Vec<WorkerRecord>> {
        let mut records = Vec::new();
        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed: PsLine = serde_json::from_str(line).map_err(|e| {
                Error::RuntimeQuery(format!(
                    "structured listing unavailable, refusing to treat as empty: {} (line: {})",
                    e, line
                ))
            })?;

            // The name filter is a substring match on the runtime side;
            // enforce the prefix here.
            let name = parsed.names.trim_start_matches('/').to_string();
            if !name.starts_with(name_prefix) {
                continue;
            }

            let state = if parsed.state.eq_ignore_ascii_case("running") {
                WorkerState::Running
            } else {
                WorkerState::Stopped
            };
            records.push(WorkerRecord {
                id: parsed.id,
                name,
                state,
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list(&self, name_prefix: &str) -> Result<Vec<WorkerRecord>> {
        let args = vec![
            "ps".to_string(),
            "--all".to_string(),
            "--no-trunc".to_string(),
            "--filter".to_string(),
            format!("name={}", name_prefix),
            "--format".to_string(),
            "{{json .}}".to_string(),
        ];
        let output = self.output(&args).await?;
        if !output.status.success() {
            return Err(Error::RuntimeQuery(format!(
                "{} ps failed: {}",
                self.cli,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Self::parse_listing(&String::from_utf8_lossy(&output.stdout), name_prefix)
    }

    async fn run(&self, spec: &LaunchSpec) -> Result<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];

        for (key, value) in &spec.env {
            args.extend(["-e".to_string(), format!("{}={}", key, value)]);
        }
        for mount in &spec.mounts {
            let mode = if mount.read_only { "ro" } else { "rw" };
            args.extend([
                "-v".to_string(),
                format!(
                    "{}:{}:{}",
                    mount.host_path.display(),
                    mount.container_path.display(),
                    mode
                ),
            ]);
        }
        if let Some(ref memory) = spec.memory_limit {
            args.extend(["--memory".to_string(), memory.clone()]);
        }
        if let Some(cpus) = spec.cpu_limit {
            args.extend(["--cpus".to_string(), cpus.to_string()]);
        }
        if spec.no_network {
            args.push("--network=none".to_string());
        }
        args.push(spec.image.clone());

        let output = self.output(&args).await?;
        if !output.status.success() {
            return Err(Error::LaunchFailure(format!(
                "{} run failed: {}",
                self.cli,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn stop(&self, ids: &[String]) -> Result<()> {
        self.run_idempotent("stop", ids).await
    }

    async fn remove(&self, ids: &[String]) -> Result<()> {
        self.run_idempotent("rm", ids).await
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Running}}".to_string(),
            id.to_string(),
        ];
        let output = self.output(&args).await?;
        if !output.status.success() {
            // Missing container: not running
            return Ok(false);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_listing() {
        let stdout = concat!(
            "{\"ID\":\"abc123\",\"Names\":\"burrow-123-c.us-g1\",\"State\":\"running\"}\n",
            "{\"ID\":\"def456\",\"Names\":\"burrow-456-c.us-g3\",\"State\":\"exited\"}\n",
        );
        let records = DockerRuntime::parse_listing(stdout, "burrow-").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "abc123");
        assert_eq!(records[0].state, WorkerState::Running);
        assert_eq!(records[1].state, WorkerState::Stopped);
    }

    #[test]
    fn test_parse_empty_listing_is_ok() {
        let records = DockerRuntime::parse_listing("", "burrow-").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_malformed_listing_fails_loudly() {
        // A human-formatted table must never be treated as "no workers"
        let stdout = "CONTAINER ID   IMAGE   COMMAND   NAMES\nabc123   img   cmd   burrow-x-g1\n";
        let result = DockerRuntime::parse_listing(stdout, "burrow-");
        assert!(matches!(result, Err(Error::RuntimeQuery(_))));
    }

    #[test]
    fn test_prefix_enforced_client_side() {
        // The runtime's name filter is substring-based; unrelated containers
        // that slip through are dropped here.
        let stdout =
            "{\"ID\":\"zzz\",\"Names\":\"other-burrow-123-g1\",\"State\":\"running\"}\n";
        let records = DockerRuntime::parse_listing(stdout, "burrow-").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_leading_slash_in_names_stripped() {
        let stdout = "{\"ID\":\"abc\",\"Names\":\"/burrow-123-g1\",\"State\":\"running\"}\n";
        let records = DockerRuntime::parse_listing(stdout, "burrow-").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "burrow-123-g1");
    }
}
