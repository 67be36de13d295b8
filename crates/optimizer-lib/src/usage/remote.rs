//! Remote command execution with bounded polling, plus the scripts the
//! acquisition strategies send and parsers for their output.

use super::AcquisitionError;
use crate::backend::{CommandStatus, RemoteExecService};
use crate::config::PollSettings;
use crate::models::Platform;
use crate::observability::OptimizerMetrics;
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends a script and polls until it reaches a terminal status
#[derive(Clone)]
pub struct RemoteCommandRunner {
    remote: Arc<dyn RemoteExecService>,
    poll: PollSettings,
    metrics: OptimizerMetrics,
}

impl RemoteCommandRunner {
    pub fn new(remote: Arc<dyn RemoteExecService>, poll: PollSettings) -> Self {
        Self {
            remote,
            poll,
            metrics: OptimizerMetrics::new(),
        }
    }

    /// Run `script` and return its stdout
    ///
    /// Fails with [`AcquisitionError::Timeout`] when the command is still
    /// running after the configured number of status checks.
    pub async fn run(
        &self,
        instance_id: &str,
        platform: Platform,
        script: &str,
    ) -> Result<String, AcquisitionError> {
        let command_id = self.remote.send_command(instance_id, platform, script).await?;
        debug!(instance_id = %instance_id, command_id = %command_id, script = %script, "Sent remote command");

        for attempt in 1..=self.poll.max_attempts {
            tokio::time::sleep(self.poll.interval()).await;

            let invocation = self.remote.command_status(&command_id, instance_id).await?;
            if !invocation.status.is_terminal() {
                debug!(command_id = %command_id, attempt = attempt, "Remote command still running");
                continue;
            }

            return match invocation.status {
                CommandStatus::Success => Ok(invocation.stdout.trim().to_string()),
                status => Err(AcquisitionError::CommandFailed {
                    status,
                    stderr: invocation.stderr.trim().to_string(),
                }),
            };
        }

        warn!(
            instance_id = %instance_id,
            command_id = %command_id,
            attempts = self.poll.max_attempts,
            "Remote command did not finish in time"
        );
        self.metrics.inc_command_timeouts();
        Err(AcquisitionError::Timeout(self.poll.max_attempts))
    }
}

/// POSIX usage query for a mounted path
pub fn posix_usage_script(path: &str) -> String {
    format!("df -P '{}'", path.replace('\'', ""))
}

/// PowerShell usage query for one drive letter
pub fn windows_usage_script(drive: char) -> String {
    format!(
        "Get-PSDrive {} | Select-Object Name, @{{Name=\"UsedPercent\";Expression={{($_.Used / ($_.Used + $_.Free)) * 100}}}} | ConvertTo-Json",
        drive
    )
}

/// Resolves where a block device is mounted
pub fn mount_lookup_script(device: &str) -> String {
    format!(
        "lsblk -n -o MOUNTPOINT '{}' | head -n 1",
        device.replace('\'', "")
    )
}

fn check_percent(value: f64, raw: &str) -> Result<f64, AcquisitionError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(AcquisitionError::Unparseable(raw.to_string()))
    }
}

/// Used percentage from `df -P` output
///
/// Accepts the full table or a bare number.
pub fn parse_df_output(stdout: &str) -> Result<f64, AcquisitionError> {
    let trimmed = stdout.trim();
    if let Ok(value) = trimmed.trim_end_matches('%').parse::<f64>() {
        return check_percent(value, stdout);
    }

    let capacity = trimmed
        .lines()
        .filter(|line| !line.starts_with("Filesystem"))
        .find_map(|line| line.split_whitespace().nth(4))
        .ok_or_else(|| AcquisitionError::Unparseable(stdout.to_string()))?;

    let value = capacity
        .trim_end_matches('%')
        .parse::<f64>()
        .map_err(|_| AcquisitionError::Unparseable(stdout.to_string()))?;
    check_percent(value, stdout)
}

/// Used percentage from the PowerShell drive query
///
/// The output is a single object or an array of objects carrying `UsedPercent`.
pub fn parse_windows_usage(stdout: &str, drive: char) -> Result<f64, AcquisitionError> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim())
        .map_err(|_| AcquisitionError::Unparseable(stdout.to_string()))?;

    let drives = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    let wanted = drive.to_string();
    let entry = drives
        .iter()
        .find(|d| d.get("Name").and_then(|n| n.as_str()) == Some(wanted.as_str()))
        .or_else(|| drives.first())
        .ok_or_else(|| AcquisitionError::Unparseable(stdout.to_string()))?;

    let used = entry
        .get("UsedPercent")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| AcquisitionError::Unparseable(stdout.to_string()))?;
    check_percent(used, stdout)
}

/// First non-empty mount point line, if any
pub fn parse_mount_point(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('/'))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        AgentStatus, CloudSnapshot, CommandFixture, SnapshotBackend,
    };
    use std::collections::BTreeMap;

    const DF_OUTPUT: &str = "Filesystem     1024-blocks     Used Available Capacity Mounted on
/dev/nvme1n1     103081248 15462187  82353797      16% /data
";

    #[test]
    fn test_parse_df_table() {
        assert_eq!(parse_df_output(DF_OUTPUT).unwrap(), 16.0);
    }

    #[test]
    fn test_parse_df_bare_number() {
        assert_eq!(parse_df_output("42\n").unwrap(), 42.0);
        assert_eq!(parse_df_output("7%").unwrap(), 7.0);
    }

    #[test]
    fn test_parse_df_rejects_garbage() {
        assert!(parse_df_output("df: '/data': No such file or directory").is_err());
        assert!(parse_df_output("").is_err());
        assert!(parse_df_output("250").is_err());
    }

    #[test]
    fn test_parse_windows_object_and_array() {
        assert_eq!(
            parse_windows_usage(r#"{"Name":"C","UsedPercent":61.5}"#, 'C').unwrap(),
            61.5
        );
        assert_eq!(
            parse_windows_usage(
                r#"[{"Name":"C","UsedPercent":80.0},{"Name":"F","UsedPercent":12.25}]"#,
                'F'
            )
            .unwrap(),
            12.25
        );
        assert!(parse_windows_usage("Get-PSDrive : Cannot find drive", 'F').is_err());
    }

    #[test]
    fn test_parse_mount_point() {
        assert_eq!(parse_mount_point("\n/data\n"), Some("/data".to_string()));
        assert_eq!(parse_mount_point("\n\n"), None);
    }

    #[test]
    fn test_scripts() {
        assert_eq!(posix_usage_script("/data"), "df -P '/data'");
        assert!(windows_usage_script('D').starts_with("Get-PSDrive D"));
        assert_eq!(
            mount_lookup_script("/dev/xvdf"),
            "lsblk -n -o MOUNTPOINT '/dev/xvdf' | head -n 1"
        );
    }

    #[test]
    fn test_scripts_quote_arguments() {
        assert_eq!(
            mount_lookup_script("/dev/xvdf'; rm -rf /; echo '"),
            "lsblk -n -o MOUNTPOINT '/dev/xvdf; rm -rf /; echo ' | head -n 1"
        );
        assert_eq!(posix_usage_script("/data'; reboot"), "df -P '/data; reboot'");
    }

    fn backend_with(fixture: CommandFixture) -> Arc<SnapshotBackend> {
        let mut agents = BTreeMap::new();
        agents.insert("i-1".to_string(), AgentStatus::Online);
        Arc::new(SnapshotBackend::from_snapshot(CloudSnapshot {
            agents,
            commands: vec![fixture],
            ..Default::default()
        }))
    }

    fn fast_poll(max_attempts: u32) -> PollSettings {
        PollSettings {
            poll_interval_ms: 1,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_runner_returns_stdout() {
        let backend = backend_with(CommandFixture {
            instance_id: None,
            script_contains: "df -P".to_string(),
            status: CommandStatus::Success,
            stdout: "  33\n".to_string(),
            stderr: String::new(),
            pending_polls: 1,
        });
        let runner = RemoteCommandRunner::new(backend, fast_poll(3));
        let out = runner
            .run("i-1", Platform::Linux, &posix_usage_script("/"))
            .await
            .unwrap();
        assert_eq!(out, "33");
    }

    #[tokio::test]
    async fn test_runner_times_out() {
        let backend = backend_with(CommandFixture {
            instance_id: None,
            script_contains: "df -P".to_string(),
            status: CommandStatus::Success,
            stdout: "33".to_string(),
            stderr: String::new(),
            pending_polls: 10,
        });
        let runner = RemoteCommandRunner::new(backend, fast_poll(3));
        let result = runner
            .run("i-1", Platform::Linux, &posix_usage_script("/"))
            .await;
        assert!(matches!(result, Err(AcquisitionError::Timeout(3))));
    }

    #[tokio::test]
    async fn test_runner_reports_failed_command() {
        let backend = backend_with(CommandFixture {
            instance_id: None,
            script_contains: "df -P".to_string(),
            status: CommandStatus::Failed,
            stdout: String::new(),
            stderr: "permission denied".to_string(),
            pending_polls: 0,
        });
        let runner = RemoteCommandRunner::new(backend, fast_poll(3));
        let result = runner
            .run("i-1", Platform::Linux, &posix_usage_script("/"))
            .await;
        match result {
            Err(AcquisitionError::CommandFailed { status, stderr }) => {
                assert_eq!(status, CommandStatus::Failed);
                assert_eq!(stderr, "permission denied");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
