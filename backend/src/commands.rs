//! Text command protocol: one `NAME` or `NAME:payload` per WebSocket message.

use assembly_core::constraints::{AssemblySession, HistorySnapshot, InputParams};
use assembly_core::{AssemblyError, AssemblyScene, RunOptions};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;

/// Format an error as a JSON message for the frontend
pub fn format_error(code: &str, message: &str, severity: &str) -> String {
    format!(
        "ERROR_UPDATE:{}",
        json!({
            "code": code,
            "message": message,
            "severity": severity
        })
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandError {
    pub code: &'static str,
    pub message: String,
}

impl CommandError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn to_message(&self) -> String {
        format_error(self.code, &self.message, "error")
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<AssemblyError> for CommandError {
    fn from(err: AssemblyError) -> Self {
        let code = match err {
            AssemblyError::UnknownConstraintType(_) | AssemblyError::UnregisteredConstraintType(_) => {
                "UNKNOWN_TYPE"
            }
            AssemblyError::ConstraintNotFound(_) => "NOT_FOUND",
            AssemblyError::InvalidSnapshot(_) | AssemblyError::Serialization(_) => "INVALID_DOCUMENT",
        };
        Self::new(code, err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct AddCmd {
    #[serde(rename = "type")]
    constraint_type: String,
    #[serde(default)]
    input: Option<InputParams>,
}

#[derive(Debug, Deserialize)]
struct MoveCmd {
    id: String,
    delta: isize,
}

#[derive(Debug, Deserialize)]
struct UpdateCmd {
    id: String,
    params: InputParams,
}

#[derive(Debug, Deserialize)]
struct EnableCmd {
    id: String,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct OpenCmd {
    id: String,
    #[serde(default = "default_true")]
    open: bool,
    #[serde(default)]
    exclusive: bool,
}

#[derive(Debug, Deserialize)]
struct VarCmd {
    name: String,
    value: Option<f64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone)]
pub enum Command {
    Snapshot,
    Scene,
    Add { constraint_type: String, input: Option<InputParams> },
    Remove(String),
    Move { id: String, delta: isize },
    Update { id: String, params: InputParams },
    Enable { id: String, enabled: bool },
    Open { id: String, open: bool, exclusive: bool },
    Load(Value),
    LoadScene(AssemblyScene),
    SetVariable { name: String, value: Option<f64> },
    Run(Option<RunOptions>),
    Cancel,
    Check,
}

fn payload<'a, T: Deserialize<'a>>(name: &str, text: &'a str) -> Result<T, CommandError> {
    serde_json::from_str(text)
        .map_err(|e| CommandError::new("BAD_PAYLOAD", format!("{}: {}", name, e)))
}

pub fn parse_command(text: &str) -> Result<Command, CommandError> {
    let (name, body) = match text.split_once(':') {
        Some((name, body)) => (name, body.trim()),
        None => (text.trim(), ""),
    };

    let command = match name {
        "SNAPSHOT" => Command::Snapshot,
        "SCENE" => Command::Scene,
        "ADD" => {
            let cmd: AddCmd = payload(name, body)?;
            Command::Add { constraint_type: cmd.constraint_type, input: cmd.input }
        }
        "REMOVE" if !body.is_empty() => Command::Remove(body.to_string()),
        "MOVE" => {
            let cmd: MoveCmd = payload(name, body)?;
            Command::Move { id: cmd.id, delta: cmd.delta }
        }
        "UPDATE" => {
            let cmd: UpdateCmd = payload(name, body)?;
            Command::Update { id: cmd.id, params: cmd.params }
        }
        "ENABLE" => {
            let cmd: EnableCmd = payload(name, body)?;
            Command::Enable { id: cmd.id, enabled: cmd.enabled }
        }
        "OPEN" => {
            let cmd: OpenCmd = payload(name, body)?;
            Command::Open { id: cmd.id, open: cmd.open, exclusive: cmd.exclusive }
        }
        "LOAD" => Command::Load(payload(name, body)?),
        "LOAD_SCENE" => Command::LoadScene(payload(name, body)?),
        "VAR" => {
            let cmd: VarCmd = payload(name, body)?;
            Command::SetVariable { name: cmd.name, value: cmd.value }
        }
        "RUN" if body.is_empty() => Command::Run(None),
        "RUN" => Command::Run(Some(payload(name, body)?)),
        "CANCEL" => Command::Cancel,
        "CHECK" => Command::Check,
        _ => return Err(CommandError::new("UNKNOWN_COMMAND", format!("Unknown command: {}", text))),
    };
    Ok(command)
}

/// What the host should send back after a command was applied.
#[derive(Debug, Clone)]
pub enum Reply {
    History(HistorySnapshot),
    Scene(AssemblyScene),
    Errors(Value),
}

impl Reply {
    pub fn to_message(&self) -> String {
        let (tag, body) = match self {
            Reply::History(snapshot) => ("HISTORY_UPDATE", serde_json::to_string(snapshot)),
            Reply::Scene(scene) => ("SCENE_UPDATE", serde_json::to_string(scene)),
            Reply::Errors(map) => ("CHECK_UPDATE", serde_json::to_string(map)),
        };
        format!("{}:{}", tag, body.unwrap_or_else(|_| "{}".into()))
    }
}

/// Applies every command that only touches the session. `Run` and `Cancel`
/// belong to the host and are rejected here.
pub fn apply(session: &mut AssemblySession<AssemblyScene>, command: Command) -> Result<Reply, CommandError> {
    let history = &mut session.history;
    match command {
        Command::Snapshot => {}
        Command::Scene => return Ok(Reply::Scene(session.scene.clone())),
        Command::Add { constraint_type, input } => {
            history.add_constraint(&constraint_type, input)?;
        }
        Command::Remove(id) => {
            history
                .remove_constraint(&id)
                .ok_or_else(|| AssemblyError::ConstraintNotFound(id.clone()))?;
        }
        Command::Move { id, delta } => {
            if !history.move_constraint(&id, delta) {
                return Err(CommandError::new("MOVE_REJECTED", format!("Cannot move {} by {}", id, delta)));
            }
        }
        Command::Update { id, params } => {
            history.update_constraint_params(&id, |current| {
                for (key, value) in params {
                    if value.is_null() {
                        current.remove(&key);
                    } else {
                        current.insert(key, value);
                    }
                }
            })?;
        }
        Command::Enable { id, enabled } => {
            history.set_constraint_enabled(&id, enabled)?;
        }
        Command::Open { id, open, exclusive } => {
            let found = if exclusive && open {
                history.set_exclusive_open(&id)
            } else {
                history.set_open_state(&id, open)
            };
            if !found {
                return Err(AssemblyError::ConstraintNotFound(id).into());
            }
        }
        Command::Load(document) => history.deserialize(&document)?,
        Command::LoadScene(mut scene) => {
            scene.refresh_transforms();
            session.scene = scene;
            return Ok(Reply::Scene(session.scene.clone()));
        }
        Command::SetVariable { name, value } => match value {
            Some(value) => {
                history.variables.set(&name, value);
            }
            None => {
                history.variables.remove(&name);
            }
        },
        Command::Check => {
            let duplicates = history.check_constraint_errors();
            let report: serde_json::Map<String, Value> = duplicates
                .into_iter()
                .map(|(id, info)| {
                    (id, json!({
                        "message": info.message,
                        "signature": info.signature,
                        "relatedIds": info.related_ids,
                        "family": info.family,
                    }))
                })
                .collect();
            return Ok(Reply::Errors(Value::Object(report)));
        }
        Command::Run(_) | Command::Cancel => {
            return Err(CommandError::new("UNSUPPORTED", "run control is handled by the host"));
        }
    }
    Ok(Reply::History(session.history.snapshot()))
}
