use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use vtg_catalog::RequirementClass;
use vtg_core::FragmentDesc;

use crate::pipeline::{execute_stage, StageError, StageInvocation, StageRegistry};

use super::paths::{stage_output, WorkPaths, ABSTRACT_TASKS, INITIAL_TASK, SINGLE_MODEL};
use super::task::{AbstractTask, EnvModel};

/// Attribute naming the environment model in a generated abstract task.
const ENV_MODEL_ATTR: &str = "environment model identifier";

/// Runs the shared-prefix stages once per (fragment, class) and fans out
/// the resulting environment models.
#[derive(Clone)]
pub struct AbstractTaskFactory {
    registry: Arc<StageRegistry>,
    paths: WorkPaths,
}

impl AbstractTaskFactory {
    pub fn new(registry: Arc<StageRegistry>, paths: WorkPaths) -> Self {
        Self { registry, paths }
    }

    /// Generate the environment models of `task` using the pilot's shared
    /// stages.
    ///
    /// An empty list is a valid outcome: no model could be generated.
    pub async fn generate(
        &self,
        task: &AbstractTask,
        class: &RequirementClass,
    ) -> Result<Vec<EnvModel>, StageError> {
        let dir = self.paths.abstract_dir(&task.id);
        tokio::fs::create_dir_all(&dir).await?;

        let fragment = FragmentDesc::from_file(&task.descriptor)?;
        let initial = dir.join(INITIAL_TASK);
        write_json(&initial, &initial_description(&fragment, class)).await?;

        let shared = class.shared_prefix();
        if shared.is_empty() {
            debug!(task = %task.id, "No shared stages, fragment description is the only model");
            return Ok(vec![EnvModel {
                id: SINGLE_MODEL.to_string(),
                dir: self.paths.model_dir(&task.id, SINGLE_MODEL),
                artifact: initial,
            }]);
        }

        let mut input = initial;
        for (idx, stage) in shared.iter().enumerate() {
            let output = if idx + 1 == shared.len() {
                dir.join(ABSTRACT_TASKS)
            } else {
                dir.join(stage_output(stage.name))
            };
            let invocation = StageInvocation {
                stage: stage.name,
                options: stage.options.clone(),
                input,
                output: output.clone(),
                work_dir: dir.join(stage.name.dir_name()),
                requirement: None,
                limits: None,
            };
            execute_stage(&self.registry, &invocation).await?;
            input = output;
        }

        let generated = read_descriptions(&input).await?;
        let models = self.store_models(task, generated).await?;
        if models.is_empty() {
            warn!(task = %task.id, "No environment models were generated");
        } else {
            info!(task = %task.id, models = models.len(), "Environment models generated");
        }
        Ok(models)
    }

    /// Write every generated description into its own model directory.
    async fn store_models(
        &self,
        task: &AbstractTask,
        generated: Vec<Value>,
    ) -> Result<Vec<EnvModel>, StageError> {
        let single = generated.len() == 1;
        let mut seen = BTreeSet::new();
        let mut models = Vec::with_capacity(generated.len());

        for (idx, desc) in generated.into_iter().enumerate() {
            let id = if single {
                SINGLE_MODEL.to_string()
            } else {
                let named = desc
                    .get(ENV_MODEL_ATTR)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("model-{idx}"));
                if seen.contains(&named) {
                    format!("{named}-{idx}")
                } else {
                    named
                }
            };
            seen.insert(id.clone());

            let dir = self.paths.model_dir(&task.id, &id);
            tokio::fs::create_dir_all(&dir).await?;
            let artifact = dir.join(INITIAL_TASK);
            write_json(&artifact, &desc).await?;
            models.push(EnvModel { id, dir, artifact });
        }
        Ok(models)
    }
}

fn initial_description(fragment: &FragmentDesc, class: &RequirementClass) -> Value {
    let mut desc = serde_json::to_value(fragment).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut desc {
        map.insert("fragment".into(), json!(fragment.id));
        map.insert("requirement class".into(), json!(class.key()));
        map.insert("files".into(), json!(fragment.files()));
    }
    desc
}

/// The last shared stage writes either a list of descriptions or a single one.
async fn read_descriptions(path: &Path) -> Result<Vec<Value>, StageError> {
    let content = tokio::fs::read(path).await?;
    match serde_json::from_slice(&content)? {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        single => Ok(vec![single]),
    }
}

async fn write_json(path: &Path, value: &Value) -> Result<(), StageError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
