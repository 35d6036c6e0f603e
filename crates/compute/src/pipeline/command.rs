use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use vtg_catalog::StageKind;
use vtg_core::PluginCommand;

use super::{StageError, StageInvocation, StageRunner};

/// Runs a plugin stage as an external executable.
///
/// The command is invoked as
/// `<command> <args..> <conf.json> <input> <output>` inside the stage working
/// directory. A non-zero exit status is a stage failure.
#[derive(Debug, Clone)]
pub struct CommandStage {
    stage: StageKind,
    command: PluginCommand,
}

impl CommandStage {
    pub fn new(stage: StageKind, command: PluginCommand) -> Self {
        Self { stage, command }
    }
}

#[async_trait]
impl StageRunner for CommandStage {
    async fn run(&self, inv: &StageInvocation) -> Result<(), StageError> {
        debug!(stage = %self.stage, command = %self.command.command, "Starting plugin");
        let output = Command::new(&self.command.command)
            .args(&self.command.args)
            .arg(inv.conf_path())
            .arg(&inv.input)
            .arg(&inv.output)
            .current_dir(&inv.work_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StageError::Spawn {
                stage: self.stage,
                reason: format!("{}: {e}", self.command.command),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(stage = %self.stage, status = %output.status, stderr = %stderr.trim(), "Plugin failed");
            return Err(StageError::Exit {
                stage: self.stage,
                status: output.status.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;

    fn invocation(dir: &Path) -> StageInvocation {
        StageInvocation {
            stage: StageKind::Weaver,
            options: Default::default(),
            input: dir.join("in.json"),
            output: dir.join("out.json"),
            work_dir: dir.to_path_buf(),
            requirement: None,
            limits: None,
        }
    }

    #[tokio::test]
    async fn successful_command_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.json"), "{}").unwrap();
        let stage = CommandStage::new(
            StageKind::Weaver,
            PluginCommand {
                command: "sh".into(),
                args: vec!["-c".into(), "cp \"$2\" \"$3\"".into(), "weaver".into()],
            },
        );
        stage.run(&invocation(dir.path())).await.unwrap();
        assert!(dir.path().join("out.json").exists());
    }

    #[tokio::test]
    async fn failing_command_is_a_stage_error() {
        let dir = tempfile::tempdir().unwrap();
        let stage = CommandStage::new(
            StageKind::Weaver,
            PluginCommand {
                command: "sh".into(),
                args: vec!["-c".into(), "exit 3".into()],
            },
        );
        let err = stage.run(&invocation(dir.path())).await.unwrap_err();
        assert!(matches!(err, StageError::Exit { .. }));
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let stage = CommandStage::new(
            StageKind::Weaver,
            PluginCommand {
                command: "/nonexistent/vtg-plugin".into(),
                args: vec![],
            },
        );
        let err = stage.run(&invocation(dir.path())).await.unwrap_err();
        assert!(matches!(err, StageError::Spawn { .. }));
    }
}
