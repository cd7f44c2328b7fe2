//! Headless mode runner - main loop without a window
//!
//! Starts (or adopts) the server, forwards live events to stdout, executes
//! stdin commands and stops the server on Ctrl-C or `quit`.

use std::sync::Arc;

use color_eyre::eyre::eyre;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use mars_app::{EventSubscription, MarsApi};
use mars_core::ServerEvent;
use mars_daemon::resolve_workdir;

use super::{HeadlessCommand, HeadlessEvent};

/// Capacity of the event channel between the stream task and stdout
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Headless run switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessOptions {
    /// Subscribe to the live event stream
    pub events: bool,
    /// Read commands from stdin
    pub stdin: bool,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            events: true,
            stdin: true,
        }
    }
}

/// Run until Ctrl-C or `quit`, then stop the server
pub async fn run_headless(api: Arc<MarsApi>, options: HeadlessOptions) -> color_eyre::Result<()> {
    let url = api.gateway().config().base_url();
    info!("═══════════════════════════════════════════════════════");
    info!("Mars starting in HEADLESS mode");
    info!("Server: {}", url);
    info!("═══════════════════════════════════════════════════════");

    let workdir = resolve_workdir(api.env()).map(|dir| dir.display().to_string());
    HeadlessEvent::server_starting(&url, workdir).emit();

    let started = api.start_server().await;
    if started["success"] != Value::Bool(true) {
        let message = error_text(&started);
        HeadlessEvent::error(message.clone(), true).emit();
        return Err(eyre!(message));
    }
    HeadlessEvent::server_ready(&url).emit();

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let subscription = options.events.then(|| api.subscribe_events(event_tx));

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    if options.stdin {
        std::thread::spawn(move || read_stdin_commands(cmd_tx));
    } else {
        drop(cmd_tx);
    }

    headless_loop(&api, subscription, event_rx, cmd_rx).await;

    let stopped = api.stop_server().await;
    if stopped["success"] == Value::Bool(true) {
        HeadlessEvent::server_stopped(&url).emit();
    } else {
        HeadlessEvent::error(error_text(&stopped), false).emit();
    }

    info!("Mars headless mode exiting");
    Ok(())
}

/// Main select loop; returns when the user asks to quit
async fn headless_loop(
    api: &MarsApi,
    mut subscription: Option<EventSubscription>,
    mut event_rx: mpsc::Receiver<ServerEvent>,
    mut cmd_rx: mpsc::Receiver<HeadlessCommand>,
) {
    let mut events_open = subscription.is_some();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break;
            }
            event = event_rx.recv(), if events_open => match event {
                Some(event) => HeadlessEvent::server_event(event).emit(),
                None => {
                    events_open = false;
                    let reason = match subscription.take() {
                        Some(subscription) => subscription.finished().await.to_string(),
                        None => "closed".to_string(),
                    };
                    warn!("Event stream ended: {}", reason);
                    HeadlessEvent::stream_ended(reason).emit();
                }
            },
            command = cmd_rx.recv(), if stdin_open => match command {
                Some(HeadlessCommand::Quit) => {
                    info!("Stdin: quit requested");
                    break;
                }
                Some(command) => {
                    let result = execute(api, &command).await;
                    HeadlessEvent::reply(command.name(), result).emit();
                }
                None => stdin_open = false,
            },
        }
    }

    if let Some(mut subscription) = subscription {
        subscription.cancel();
    }
}

/// Run one stdin command against the API
async fn execute(api: &MarsApi, command: &HeadlessCommand) -> Value {
    match command {
        HeadlessCommand::Status => api.is_server_running().await,
        HeadlessCommand::Sessions => api.list_sessions().await,
        HeadlessCommand::NewSession(title) => api.create_session(title.clone(), None).await,
        HeadlessCommand::UseSession(id) => {
            api.set_current_session(Some(id.clone()));
            api.get_session(id).await
        }
        HeadlessCommand::Send(text) => api.send_message(text, None, None, None).await,
        HeadlessCommand::Prompt(text) => match api.current_session_id() {
            Some(sid) => api.stream_message(&sid, text, None, None).await,
            None => serde_json::json!({
                "success": false,
                "error": mars_core::Error::NoActiveSession.to_string(),
            }),
        },
        HeadlessCommand::Abort => api.abort_session(None).await,
        HeadlessCommand::Messages => api.list_messages(None, None).await,
        HeadlessCommand::Todos => api.list_todos(None).await,
        HeadlessCommand::Project => api.get_current_project().await,
        HeadlessCommand::Files(path) => api.list_files(path),
        HeadlessCommand::Open(path) => api.open_in_editor(path.as_deref()).await,
        HeadlessCommand::Quit => serde_json::json!({ "success": true, "error": null }),
    }
}

fn error_text(result: &Value) -> String {
    result["error"]
        .as_str()
        .unwrap_or("unknown error")
        .to_string()
}

/// Blocking stdin reader; runs on its own thread
fn read_stdin_commands(cmd_tx: mpsc::Sender<HeadlessCommand>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) => {
                let Some(command) = HeadlessCommand::parse(&line) else {
                    continue;
                };
                let quit = command == HeadlessCommand::Quit;
                if cmd_tx.blocking_send(command).is_err() || quit {
                    break;
                }
            }
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    info!("Stdin reader exiting");
}
