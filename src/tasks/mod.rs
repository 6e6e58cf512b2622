//! Allowlisted maintenance tasks
//!
//! Tasks come only from YAML files named in configuration. Every parameter
//! is checked against its pattern and shell-quoted before it reaches the
//! command template.

use crate::config::ScanConfig;
use crate::{Result, ScanError};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

pub const DEFAULT_PARAM_PATTERN: &str = r"^[\w/\-.]+$";

/// Exit code reported when parameters are rejected
pub const EXIT_INVALID: i32 = 2;
/// Exit code reported when the task exceeds its time limit
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code reported when the task cannot be started
pub const EXIT_ERROR: i32 = 1;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{|\}\}|\{(\w+)\}").expect("valid regex"));

/// Where a task executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    Host,
    #[serde(alias = "docker")]
    Container,
}

impl Default for TaskMode {
    fn default() -> Self {
        TaskMode::Host
    }
}

/// Schema of one `{placeholder}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamDef {
    pub name: String,
    pub pattern: String,
    pub required: bool,
}

impl ParamDef {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            pattern: DEFAULT_PARAM_PATTERN.to_string(),
            required: true,
        }
    }
}

/// One approved task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    pub command: String,
    pub mode: TaskMode,
    pub params: Vec<ParamDef>,
}

#[derive(Debug, Deserialize)]
struct RawParam {
    name: Option<String>,
    pattern: Option<String>,
    required: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: String,
    name: Option<String>,
    #[serde(default)]
    description: String,
    command: String,
    #[serde(default)]
    mode: TaskMode,
    #[serde(default)]
    params: Option<Vec<RawParam>>,
}

impl From<RawTask> for Task {
    fn from(raw: RawTask) -> Self {
        let params = raw
            .params
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| {
                let name = p.name.filter(|n| !n.is_empty())?;
                Some(ParamDef {
                    name,
                    pattern: p.pattern.unwrap_or_else(|| DEFAULT_PARAM_PATTERN.to_string()),
                    required: p.required.unwrap_or(true),
                })
            })
            .collect();
        Task {
            name: raw.name.unwrap_or_else(|| raw.id.clone()),
            id: raw.id,
            description: raw.description,
            command: raw.command,
            mode: raw.mode,
            params,
        }
    }
}

/// Parse the `tasks:` list of one YAML document; malformed entries are skipped
pub fn parse_tasks(yaml: &str) -> Result<Vec<Task>> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| ScanError::ParseError(format!("Invalid task YAML: {}", e)))?;

    let items = match doc.get("tasks").and_then(|t| t.as_sequence()) {
        Some(items) => items.clone(),
        None => return Ok(Vec::new()),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_yaml::from_value::<RawTask>(item) {
            Ok(raw) => Some(Task::from(raw)),
            Err(e) => {
                debug!("Skipping malformed task entry: {}", e);
                None
            }
        })
        .collect())
}

/// Load tasks from every readable file; the first definition of an id wins
pub fn load_tasks(paths: &[PathBuf]) -> Vec<Task> {
    let mut seen = HashSet::new();
    let mut tasks = Vec::new();

    for path in paths {
        let parsed = fs::read_to_string(path)
            .map_err(ScanError::from)
            .and_then(|text| parse_tasks(&text));
        match parsed {
            Ok(file_tasks) => {
                for task in file_tasks {
                    if seen.insert(task.id.clone()) {
                        tasks.push(task);
                    }
                }
            }
            Err(e) => debug!("Skipping task file {}: {}", path.display(), e),
        }
    }

    tasks
}

/// Quote a value for a POSIX shell, `''` for the empty string
pub fn shell_quote(value: &str) -> Result<String> {
    shlex::try_quote(value)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| ScanError::TaskError(format!("Cannot quote parameter value: {}", e)))
}

/// Validate `params` against `task` and substitute them into its command
pub fn render(task: &Task, params: &HashMap<String, String>) -> Result<String> {
    let allowed: HashMap<&str, &ParamDef> = task.params.iter().map(|p| (p.name.as_str(), p)).collect();

    if let Some(unknown) = params.keys().find(|k| !allowed.contains_key(k.as_str())) {
        return Err(ScanError::TaskError(format!("Unknown parameter: {}", unknown)));
    }

    let mut quoted: HashMap<&str, String> = HashMap::new();
    for def in &task.params {
        // An absent optional parameter is checked as the empty string
        let value = match params.get(&def.name) {
            Some(value) => value.as_str(),
            None if def.required => {
                return Err(ScanError::TaskError(format!("Missing required parameter: {}", def.name)))
            }
            None => "",
        };

        let pattern = Regex::new(&def.pattern)
            .map_err(|_| ScanError::TaskError(format!("Invalid regex for '{}'", def.name)))?;
        if !pattern.find(value).map_or(false, |m| m.start() == 0) {
            return Err(ScanError::TaskError(format!("Parameter '{}' failed validation", def.name)));
        }
        quoted.insert(def.name.as_str(), shell_quote(value)?);
    }

    let mut missing = None;
    let rendered = PLACEHOLDER.replace_all(&task.command, |caps: &regex::Captures| match &caps[0] {
        "{{" => "{".to_string(),
        "}}" => "}".to_string(),
        _ => match quoted.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        },
    });

    match missing {
        Some(name) => Err(ScanError::TaskError(format!("Missing placeholder: {}", name))),
        None => Ok(rendered.into_owned()),
    }
}

/// Exit code and combined stdout+stderr of a task run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub code: i32,
    pub output: String,
}

impl TaskOutcome {
    fn new(code: i32, output: impl Into<String>) -> Self {
        Self { code, output: output.into() }
    }
}

/// Runs tasks from the configured allowlist
pub struct TaskRunner {
    enabled: bool,
    files: Vec<PathBuf>,
    limit: Duration,
    container: String,
}

impl TaskRunner {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            enabled: config.tasks_enabled,
            files: config.task_files.clone(),
            limit: Duration::from_secs(config.task_timeout_secs.max(1)),
            container: config.exec_container.clone(),
        }
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(ScanError::TaskError("task runner is disabled".to_string()))
        }
    }

    /// Approved tasks, reloaded from disk on every call
    pub fn list(&self) -> Result<Vec<Task>> {
        self.ensure_enabled()?;
        Ok(load_tasks(&self.files))
    }

    /// Run task `id`; validation problems come back as exit code 2
    pub async fn run(&self, id: &str, params: &HashMap<String, String>, cwd: Option<&Path>) -> Result<TaskOutcome> {
        let task = self
            .list()?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| ScanError::TaskError(format!("Unknown task: {}", id)))?;
        Ok(run_task(&task, params, cwd, self.limit, &self.container).await)
    }
}

/// Argument vector for a rendered command
pub fn command_line(task: &Task, rendered: &str, cwd: &Path, container: &str) -> Vec<String> {
    let wrapped = format!("cd {} ; {}", shell_quote(&cwd.to_string_lossy()), rendered);
    let mut argv = Vec::new();
    if task.mode == TaskMode::Container {
        argv.extend(["docker".to_string(), "exec".to_string(), container.to_string()]);
    }
    argv.extend(["bash".to_string(), "-lc".to_string(), wrapped]);
    argv
}

fn default_cwd(mode: TaskMode) -> PathBuf {
    match mode {
        TaskMode::Container => PathBuf::from("/root"),
        TaskMode::Host => dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
    }
}

/// Render and execute a task under `limit`
pub async fn run_task(
    task: &Task,
    params: &HashMap<String, String>,
    cwd: Option<&Path>,
    limit: Duration,
    container: &str,
) -> TaskOutcome {
    let rendered = match render(task, params) {
        Ok(rendered) => rendered,
        Err(e) => {
            warn!("Rejected parameters for task {}: {}", task.id, e);
            return TaskOutcome::new(EXIT_INVALID, e.to_string());
        }
    };

    let cwd = cwd.map(Path::to_path_buf).unwrap_or_else(|| default_cwd(task.mode));
    let argv = command_line(task, &rendered, &cwd, container);
    info!("Running task {} ({:?} mode)", task.id, task.mode);

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            TaskOutcome::new(output.status.code().unwrap_or(EXIT_ERROR), combined)
        }
        Ok(Err(e)) => TaskOutcome::new(EXIT_ERROR, format!("Task error: {}", e)),
        Err(_) => TaskOutcome::new(EXIT_TIMEOUT, "Task timed out"),
    }
}
