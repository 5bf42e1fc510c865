use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use assembly_core::constraints::{
    AssemblySession, AutoRunner, HookDetail, HookError, HookEvent, RunHooks, RunScheduler,
};
use assembly_core::{AssemblyScene, ConstraintHistory, RunReport};
use serde_json::json;

mod commands;
mod config;

use commands::{Command, Reply};
use config::BackendConfig;

type SharedSession = Arc<Mutex<AssemblySession<AssemblyScene>>>;

// Application State
struct AppState {
    session: SharedSession,
    scheduler: Arc<RunScheduler>,
    runner: AutoRunner,
    updates: broadcast::Sender<String>,
}

/// Streams solver progress to every connected client.
struct BroadcastHooks {
    updates: broadcast::Sender<String>,
}

impl RunHooks for BroadcastHooks {
    fn on_iteration_complete(&self, event: &HookEvent<'_>) -> Result<(), HookError> {
        let applied = matches!(event.detail, HookDetail::IterationComplete { applied: true });
        let progress = json!({
            "iteration": event.iteration,
            "totalConstraints": event.total_constraints,
            "applied": applied,
        });
        // No subscribers is fine.
        let _ = self.updates.send(format!("PROGRESS_UPDATE:{}", progress));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BackendConfig::load()?;
    let options = config.solver.run_options();
    let session = Arc::new(Mutex::new(load_session(&config)));
    let (updates, _) = broadcast::channel(64);
    let hooks: Arc<dyn RunHooks> = Arc::new(BroadcastHooks { updates: updates.clone() });

    // Every run, automatic or requested, goes through one scheduler.
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = Arc::new(RunScheduler::new());
    let runner = if config.auto_run {
        AutoRunner::spawn(session.clone(), scheduler.clone(), options, hooks, Some(tx)).await
    } else {
        AutoRunner::spawn_detached(session.clone(), scheduler.clone(), options, hooks, Some(tx))
    };
    tokio::spawn(forward_reports(rx, session.clone(), updates.clone()));

    let shared_state = Arc::new(AppState {
        session,
        scheduler,
        runner,
        updates,
    });

    let app = Router::new()
        .route("/", get(root))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state);

    let addr = config.socket_addr()?;
    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Restores the configured document and scene. Unreadable files are logged
/// and the host starts empty instead.
fn load_session(config: &BackendConfig) -> AssemblySession<AssemblyScene> {
    let mut history = ConstraintHistory::with_builtin();
    if let Some(path) = &config.document {
        match std::fs::read_to_string(path) {
            Ok(text) => match history.from_json(&text) {
                Ok(()) => info!("restored {} constraints from {}", history.len(), path.display()),
                Err(e) => warn!("ignoring document {}: {}", path.display(), e),
            },
            Err(e) => warn!("cannot read document {}: {}", path.display(), e),
        }
    }

    let mut scene = AssemblyScene::new();
    if let Some(path) = &config.scene {
        let loaded = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<AssemblyScene>(&text).map_err(|e| e.to_string()));
        match loaded {
            Ok(mut restored) => {
                restored.refresh_transforms();
                info!("restored {} components from {}", restored.components.len(), path.display());
                scene = restored;
            }
            Err(e) => warn!("ignoring scene {}: {}", path.display(), e),
        }
    }

    AssemblySession::new(history, scene)
}

async fn forward_reports(
    mut reports: mpsc::UnboundedReceiver<RunReport>,
    session: SharedSession,
    updates: broadcast::Sender<String>,
) {
    while let Some(report) = reports.recv().await {
        publish_report(&report, &session, &updates).await;
    }
}

async fn publish_report(report: &RunReport, session: &SharedSession, updates: &broadcast::Sender<String>) {
    info!(
        "run finished after {} iterations (aborted: {})",
        report.iterations, report.aborted
    );
    let json = serde_json::to_string(report).unwrap_or("{}".into());
    let _ = updates.send(format!("RUN_COMPLETE:{}", json));

    let guard = session.lock().await;
    let _ = updates.send(Reply::Scene(guard.scene.clone()).to_message());
    let _ = updates.send(Reply::History(guard.history.snapshot()).to_message());
}

async fn root() -> String {
    format!("Assembly constraint host {}", assembly_core::version())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Client connected");
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.updates.subscribe();

    let initial = {
        let session = state.session.lock().await;
        [
            Reply::History(session.history.snapshot()).to_message(),
            Reply::Scene(session.scene.clone()).to_message(),
        ]
    };
    for message in initial {
        if sender.send(Message::Text(message)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let Some(Ok(msg)) = incoming else {
                    break;
                };
                if let Message::Text(text) = msg {
                    debug!("Received message: {}", text);
                    if let Some(reply) = handle_text(&state, &text).await {
                        if sender.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            update = updates.recv() => match update {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("client lagging, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    info!("Client disconnected");
}

/// Executes one text command. Returns a message for the sender only;
/// history and scene changes go out to every client.
async fn handle_text(state: &Arc<AppState>, text: &str) -> Option<String> {
    let command = match commands::parse_command(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("rejected command: {}", e);
            return Some(e.to_message());
        }
    };

    match command {
        Command::Run(overrides) => {
            match overrides {
                Some(options) => state.scheduler.request_with(options),
                None => state.scheduler.request(),
            }
            None
        }
        Command::Cancel => {
            state.runner.cancel();
            None
        }
        command => {
            let result = {
                let mut session = state.session.lock().await;
                commands::apply(&mut session, command)
            };
            match result {
                Ok(reply @ Reply::Errors(_)) => Some(reply.to_message()),
                Ok(reply) => {
                    let _ = state.updates.send(reply.to_message());
                    None
                }
                Err(e) => {
                    warn!("command failed: {}", e);
                    Some(e.to_message())
                }
            }
        }
    }
}
