//! `kingdom replay` command.
//!
//! Runs a scripted scenario against the in-memory engine through the same
//! session registry and adapters a UI client uses. Output is JSON Lines on
//! stdout:
//!
//! ```text
//! {"event":"notification","subscription":0,"session":"s-1","action":"build","metadata":{}}
//! {"event":"result","step":1,"op":"subscribe","output":{"subscription":0,"key":"build:{}"}}
//! {"event":"failed","step":4,"op":"perform","error":"action raid rejected: at peace"}
//! ```
//!
//! Notifications raised while a step runs are printed before that step's
//! result. A failing step is reported and the replay continues.
//!
//! ## Script format
//!
//! ```yaml
//! steps:
//!   - op: create_session
//!     session: s-1
//!   - op: subscribe
//!     session: s-1
//!     action: build
//!     params: { landId: L1 }
//!   - op: set_costs
//!     session: s-1
//!     action: build
//!     params: { landId: L1 }
//!     costs: { gold: 3 }
//!   - op: reset
//!     session: s-1
//! ```

use anyhow::{Context, Result};
use kingdom_core::{
    ActionCosts, ActionEffectGroup, KingdomConfig, MetadataSnapshot, RequirementFailure,
    create_metadata_key,
};
use kingdom_session::{
    EngineHandles, InMemoryEngine, MetadataSubscription, RemoteSessionAdapter, SessionError,
    SessionRegistry,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// A replay scenario.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub steps: Vec<ReplayStep>,
}

impl ReplayScript {
    /// Load a script from a YAML or JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read replay script {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse a script. JSON is accepted as a subset of YAML.
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("invalid replay script")
    }
}

/// One scripted operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplayStep {
    CreateSession {
        session: String,
    },
    SetCosts {
        session: String,
        action: String,
        #[serde(default)]
        params: Option<Value>,
        costs: ActionCosts,
    },
    SetRequirements {
        session: String,
        action: String,
        #[serde(default)]
        params: Option<Value>,
        requirements: Vec<RequirementFailure>,
    },
    SetOptions {
        session: String,
        action: String,
        groups: Vec<ActionEffectGroup>,
    },
    Subscribe {
        session: String,
        action: String,
        #[serde(default)]
        params: Option<Value>,
    },
    Read {
        session: String,
        action: String,
        #[serde(default)]
        params: Option<Value>,
    },
    Reset {
        session: String,
    },
    Perform {
        session: String,
        action: String,
        #[serde(default)]
        params: Option<Value>,
    },
    Advance {
        session: String,
    },
    AiTurn {
        session: String,
        player: String,
    },
    Simulate {
        session: String,
        player: String,
    },
    Snapshot {
        session: String,
    },
    Dispose {
        session: String,
    },
}

impl ReplayStep {
    /// Operation name as written in scripts.
    pub fn op(&self) -> &'static str {
        match self {
            ReplayStep::CreateSession { .. } => "create_session",
            ReplayStep::SetCosts { .. } => "set_costs",
            ReplayStep::SetRequirements { .. } => "set_requirements",
            ReplayStep::SetOptions { .. } => "set_options",
            ReplayStep::Subscribe { .. } => "subscribe",
            ReplayStep::Read { .. } => "read",
            ReplayStep::Reset { .. } => "reset",
            ReplayStep::Perform { .. } => "perform",
            ReplayStep::Advance { .. } => "advance",
            ReplayStep::AiTurn { .. } => "ai_turn",
            ReplayStep::Simulate { .. } => "simulate",
            ReplayStep::Snapshot { .. } => "snapshot",
            ReplayStep::Dispose { .. } => "dispose",
        }
    }
}

/// One line of replay output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplayEvent {
    Notification {
        subscription: usize,
        session: String,
        action: String,
        metadata: MetadataSnapshot,
    },
    Result {
        step: usize,
        op: &'static str,
        output: Value,
    },
    Failed {
        step: usize,
        op: &'static str,
        error: String,
    },
}

/// Counts reported when a replay finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub steps: usize,
    pub failures: usize,
    pub notifications: usize,
}

type Outbox = Arc<Mutex<Vec<ReplayEvent>>>;

/// Executes replay steps against a fresh in-memory engine.
pub struct ReplayRunner {
    engine: Arc<InMemoryEngine>,
    registry: SessionRegistry,
    /// Live subscriptions with the session they belong to.
    subscriptions: Vec<(String, MetadataSubscription)>,
    next_subscription: usize,
    outbox: Outbox,
}

impl ReplayRunner {
    pub fn new(config: &KingdomConfig) -> Self {
        let engine = Arc::new(InMemoryEngine::new(config.engine.clone()));
        let registry = SessionRegistry::new(
            EngineHandles::from_engine(Arc::clone(&engine)),
            config.session.clone(),
        );
        Self {
            engine,
            registry,
            subscriptions: Vec::new(),
            next_subscription: 0,
            outbox: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Run every step of `script`, writing one JSON line per event to `out`.
    pub async fn run<W: Write>(&mut self, script: &ReplayScript, out: &mut W) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();

        for (index, step) in script.steps.iter().enumerate() {
            let number = index + 1;
            let result = self.apply(step).await;

            let mut events = std::mem::take(
                &mut *self.outbox.lock().unwrap_or_else(PoisonError::into_inner),
            );
            summary.notifications += events.len();

            match result {
                Ok(output) => events.push(ReplayEvent::Result {
                    step: number,
                    op: step.op(),
                    output,
                }),
                Err(err) => {
                    tracing::warn!(step = number, op = step.op(), error = %err, "Replay step failed");
                    summary.failures += 1;
                    events.push(ReplayEvent::Failed {
                        step: number,
                        op: step.op(),
                        error: err.to_string(),
                    });
                }
            }

            for event in &events {
                serde_json::to_writer(&mut *out, event)?;
                writeln!(out)?;
            }
            summary.steps += 1;
        }

        out.flush()?;
        Ok(summary)
    }

    fn session(&self, session_id: &str) -> Result<Arc<RemoteSessionAdapter>, SessionError> {
        self.registry
            .get(session_id)
            .ok_or_else(|| SessionError::missing(session_id))
    }

    async fn apply(&mut self, step: &ReplayStep) -> Result<Value, SessionError> {
        match step {
            ReplayStep::CreateSession { session } => {
                self.registry.create(session)?;
                let snapshot = self.engine.create_session(session);
                Ok(serde_json::to_value(snapshot)?)
            }

            ReplayStep::SetCosts {
                session,
                action,
                params,
                costs,
            } => {
                self.session(session)?
                    .set_action_costs(action, costs.clone(), params.as_ref());
                Ok(json!({ "key": create_metadata_key(action, params.as_ref()) }))
            }

            ReplayStep::SetRequirements {
                session,
                action,
                params,
                requirements,
            } => {
                self.session(session)?.set_action_requirements(
                    action,
                    requirements.clone(),
                    params.as_ref(),
                );
                Ok(json!({ "key": create_metadata_key(action, params.as_ref()) }))
            }

            ReplayStep::SetOptions {
                session,
                action,
                groups,
            } => {
                self.session(session)?
                    .set_action_options(action, groups.clone());
                Ok(json!({ "key": create_metadata_key(action, None) }))
            }

            ReplayStep::Subscribe {
                session,
                action,
                params,
            } => {
                let adapter = self.session(session)?;
                let id = self.next_subscription;
                self.next_subscription += 1;

                let outbox = Arc::clone(&self.outbox);
                let (session_id, action_id) = (session.clone(), action.clone());
                let subscription =
                    adapter.subscribe_action_metadata(action, params.as_ref(), move |snapshot| {
                        outbox
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(ReplayEvent::Notification {
                                subscription: id,
                                session: session_id.clone(),
                                action: action_id.clone(),
                                metadata: snapshot.clone(),
                            });
                    });
                let key = subscription.key().clone();
                self.subscriptions.push((session.clone(), subscription));
                Ok(json!({ "subscription": id, "key": key }))
            }

            ReplayStep::Read {
                session,
                action,
                params,
            } => {
                let metadata = self
                    .session(session)?
                    .read_action_metadata(action, params.as_ref());
                Ok(serde_json::to_value(metadata)?)
            }

            ReplayStep::Reset { session } => {
                self.session(session)?.reset_action_metadata();
                Ok(Value::Null)
            }

            ReplayStep::Perform {
                session,
                action,
                params,
            } => {
                let outcome = self
                    .session(session)?
                    .perform_action(action, params.as_ref())
                    .await?;
                Ok(serde_json::to_value(outcome)?)
            }

            ReplayStep::Advance { session } => {
                let snapshot = self.session(session)?.advance_phase().await?;
                Ok(serde_json::to_value(snapshot)?)
            }

            ReplayStep::AiTurn { session, player } => {
                let acted = self.session(session)?.run_ai_turn(player).await?;
                Ok(json!({ "acted": acted }))
            }

            ReplayStep::Simulate { session, player } => {
                let result = self
                    .session(session)?
                    .simulate_upcoming_phases(player)
                    .await?;
                Ok(serde_json::to_value(result)?)
            }

            ReplayStep::Snapshot { session } => {
                let snapshot = self.session(session)?.get_snapshot()?;
                Ok(serde_json::to_value(snapshot)?)
            }

            ReplayStep::Dispose { session } => {
                // Dispose resets the session's metadata; its subscribers are
                // still attached so that notification is reported.
                let disposed = self.registry.dispose(session);
                self.subscriptions.retain(|(owner, _)| owner != session);
                self.engine.remove_session(session);
                Ok(json!({ "disposed": disposed }))
            }
        }
    }
}

/// Load `script` and replay it to stdout.
pub async fn run(script: &Path, config: &KingdomConfig) -> Result<()> {
    let script = ReplayScript::from_file(script)?;
    let mut runner = ReplayRunner::new(config);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let summary = runner.run(&script, &mut out).await?;

    tracing::info!(
        steps = summary.steps,
        failures = summary.failures,
        notifications = summary.notifications,
        "Replay finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn replay(script: &str) -> (ReplaySummary, Vec<Value>) {
        let script = ReplayScript::parse(script).unwrap();
        let mut runner = ReplayRunner::new(&KingdomConfig::default());
        let mut out = Vec::new();
        let summary = runner.run(&script, &mut out).await.unwrap();

        let lines = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (summary, lines)
    }

    #[tokio::test]
    async fn test_build_scenario_notifications() {
        let (summary, lines) = replay(
            r#"
steps:
  - op: create_session
    session: s-1
  - op: subscribe
    session: s-1
    action: build
    params: { landId: L1 }
  - op: set_costs
    session: s-1
    action: build
    params: { landId: L1 }
    costs: { gold: 3 }
  - op: reset
    session: s-1
"#,
        )
        .await;

        assert_eq!(summary, ReplaySummary { steps: 4, failures: 0, notifications: 3 });

        let metadata: Vec<&Value> = lines
            .iter()
            .filter(|line| line["event"] == "notification")
            .map(|line| &line["metadata"])
            .collect();
        assert_eq!(
            metadata,
            vec![&json!({}), &json!({"costs": {"gold": 3.0}}), &json!({})]
        );
    }

    #[tokio::test]
    async fn test_failed_step_is_reported_and_replay_continues() {
        let (summary, lines) = replay(
            r#"
steps:
  - op: perform
    session: missing
    action: build
  - op: create_session
    session: s-1
  - op: advance
    session: s-1
"#,
        )
        .await;

        assert_eq!(summary.failures, 1);
        assert_eq!(lines[0]["event"], "failed");
        assert_eq!(lines[0]["op"], "perform");
        assert_eq!(lines[2]["output"]["phase"], "upkeep");
    }

    #[tokio::test]
    async fn test_dispose_drops_session() {
        let (summary, lines) = replay(
            r#"{"steps": [
                {"op": "create_session", "session": "s-1"},
                {"op": "dispose", "session": "s-1"},
                {"op": "snapshot", "session": "s-1"}
            ]}"#,
        )
        .await;

        assert_eq!(lines[1]["output"], json!({"disposed": true}));
        assert_eq!(summary.failures, 1);
    }

    #[tokio::test]
    async fn test_dispose_reports_final_notification() {
        let (summary, lines) = replay(
            r#"
steps:
  - op: create_session
    session: s-1
  - op: subscribe
    session: s-1
    action: build
  - op: set_costs
    session: s-1
    action: build
    costs: { gold: 2 }
  - op: dispose
    session: s-1
  - op: set_costs
    session: s-1
    action: build
    costs: { gold: 4 }
"#,
        )
        .await;

        assert_eq!(summary.notifications, 3);
        let tail: Vec<&Value> = lines.iter().rev().take(3).rev().collect();
        assert_eq!(tail[0]["event"], "notification");
        assert_eq!(tail[0]["metadata"], json!({}));
        assert_eq!(tail[1]["output"], json!({"disposed": true}));
        assert_eq!(tail[2]["event"], "failed");
    }

    #[tokio::test]
    async fn test_replay_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("kingdom.yaml");
        let script_path = dir.path().join("scenario.yaml");
        fs::write(&config_path, "engine:\n  phases: [dawn, dusk]\n").unwrap();
        fs::write(
            &script_path,
            "steps:\n  - op: create_session\n    session: s-1\n  - op: advance\n    session: s-1\n",
        )
        .unwrap();

        let config = KingdomConfig::from_file(&config_path).unwrap();
        let script = ReplayScript::from_file(&script_path).unwrap();
        let mut runner = ReplayRunner::new(&config);
        let mut out = Vec::new();
        let summary = runner.run(&script, &mut out).await.unwrap();

        assert_eq!(summary, ReplaySummary { steps: 2, failures: 0, notifications: 0 });
        let out = String::from_utf8(out).unwrap();
        let last: Value = serde_json::from_str(out.lines().last().unwrap()).unwrap();
        assert_eq!(last["output"]["phase"], "dusk");
    }

    #[test]
    fn test_missing_script_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReplayScript::from_file(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(err.to_string().contains("absent.yaml"));
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let err = ReplayScript::parse("steps:\n  - op: teleport\n").unwrap_err();
        assert!(err.to_string().contains("invalid replay script"));
    }
}
