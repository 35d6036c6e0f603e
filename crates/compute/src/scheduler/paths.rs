use std::path::{Path, PathBuf};

use vtg_catalog::StageKind;

use super::task::{AbstractTaskId, TaskId};

/// Input of a pipeline: the fragment description or an environment model.
pub const INITIAL_TASK: &str = "initial abstract task.json";
/// Output of the last shared-prefix stage: one description per environment model.
pub const ABSTRACT_TASKS: &str = "abstract tasks.json";
/// Copy of the last stage output, submitted to the scheduler.
pub const FINAL_TASK: &str = "final abstract task.json";

/// Environment model identifier used when generation produced exactly one model.
pub const SINGLE_MODEL: &str = "single";

/// Output artifact of `stage`.
pub fn stage_output(stage: StageKind) -> String {
    format!("{} abstract task.json", stage.name())
}

/// Options document of `stage`.
pub fn stage_conf(stage: StageKind) -> String {
    format!("{} conf.json", stage.name())
}

/// Derives every working directory of a run from item identities.
///
/// ```text
/// <root>/<fragment>/<class>                        abstract task
/// <root>/<fragment>/<class>/<model>                environment model
/// <root>/<fragment>/<class>/<model>/<requirement>  task, attempt 0
///                        .../<requirement>/attempt-<n>
/// ```
///
/// Components are escaped (`%` as `%25`, `/` as `%2F`, dot-only names as
/// `%2E`) so identifiers stay one level deep and distinct ids never share
/// a directory.
#[derive(Debug, Clone)]
pub struct WorkPaths {
    root: PathBuf,
}

impl WorkPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn abstract_dir(&self, id: &AbstractTaskId) -> PathBuf {
        self.root
            .join(sanitize(&id.fragment))
            .join(sanitize(&id.class_key))
    }

    pub fn model_dir(&self, id: &AbstractTaskId, env_model: &str) -> PathBuf {
        self.abstract_dir(id).join(sanitize(env_model))
    }

    pub fn task_dir(&self, id: &TaskId) -> PathBuf {
        self.model_dir(&id.abstract_id(), &id.env_model)
            .join(sanitize(&id.requirement))
    }

    pub fn attempt_dir(&self, id: &TaskId, attempt: u32) -> PathBuf {
        let dir = self.task_dir(id);
        if attempt == 0 {
            dir
        } else {
            dir.join(format!("attempt-{attempt}"))
        }
    }
}

fn sanitize(component: &str) -> String {
    match component {
        "" => "%".to_string(),
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => component.replace('%', "%25").replace('/', "%2F"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(fragment: &str, requirement: &str) -> TaskId {
        TaskId {
            fragment: fragment.into(),
            class_key: "c1".into(),
            env_model: SINGLE_MODEL.into(),
            requirement: requirement.into(),
        }
    }

    #[test]
    fn nested_layout() {
        let paths = WorkPaths::new("/w");
        let t = task("drivers/usb/core.ko", "kernel:locking");
        assert_eq!(
            paths.abstract_dir(&t.abstract_id()),
            PathBuf::from("/w/drivers%2Fusb%2Fcore.ko/c1")
        );
        assert_eq!(
            paths.task_dir(&t),
            PathBuf::from("/w/drivers%2Fusb%2Fcore.ko/c1/single/kernel:locking")
        );
        assert_eq!(paths.attempt_dir(&t, 0), paths.task_dir(&t));
        assert_eq!(
            paths.attempt_dir(&t, 2),
            PathBuf::from("/w/drivers%2Fusb%2Fcore.ko/c1/single/kernel:locking/attempt-2")
        );
    }

    #[test]
    fn distinct_ids_never_share_a_directory() {
        let paths = WorkPaths::new("/w");
        let a = paths.task_dir(&task("a/b", "r"));
        let b = paths.task_dir(&task("a", "b/r"));
        assert_ne!(a, b);
    }

    #[test]
    fn escaping_is_injective() {
        let paths = WorkPaths::new("/w");
        let pairs = [
            ("a/b", "a__b"),
            ("a/b", "a%2Fb"),
            (".", "_"),
            ("..", "__"),
            ("..", "%2E%2E"),
            ("", "_"),
        ];
        for (left, right) in pairs {
            assert_ne!(
                paths.task_dir(&task("f", left)),
                paths.task_dir(&task("f", right)),
                "{left:?} and {right:?} share a directory"
            );
        }
    }

    #[test]
    fn dot_components_are_neutralised() {
        let paths = WorkPaths::new("/w");
        let dir = paths.task_dir(&task("..", "."));
        assert!(dir.starts_with("/w"));
        assert!(!dir.components().any(|c| c == std::path::Component::ParentDir));
    }

    #[test]
    fn artifact_names() {
        assert_eq!(stage_output(StageKind::Weaver), "Weaver abstract task.json");
        assert_eq!(stage_conf(StageKind::EnvironmentModel), "EMG conf.json");
    }
}
