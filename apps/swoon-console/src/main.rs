mod auth_profile;
mod bridge;
mod config;
mod logging;
mod state;

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use auth_profile::{AuthProfile, clear_auth_profile, load_auth_profile, save_auth_profile};
use backend_core::{BackendCommand, BackendEvent, BackendLifecycleState, EventStream, next_event};
use backend_platform::SecretStore;
use backend_wp::{DEFAULT_BASE_URL, WpRuntimeHandle, spawn_runtime};
use bridge::{
    ConsoleInput, HELP_TEXT, login_command_sequence, normalize_base_url, parse_input,
    post_auth_command_sequence, startup_restore_command_sequence,
};
use config::ConsoleConfig;
use state::{ConsoleState, format_message};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::Mutex,
};
use tracing::{debug, error, info, warn};

const ACTIVITY_PAGE_SIZE: u16 = 20;

/// Login in flight whose outcome decides what gets remembered.
#[derive(Debug, Clone)]
struct AuthSessionIntent {
    base_url: String,
    username: String,
    remember_session: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting swoon-console");

    let config = match ConsoleConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let profile_path = config.auth_profile_path();
    let saved_profile = match load_auth_profile(&profile_path) {
        Ok(profile) => profile,
        Err(err) => {
            warn!(error = %err, "failed loading auth profile; ignoring persisted profile");
            None
        }
    };

    let raw_base_url = saved_profile
        .as_ref()
        .map(|profile| profile.base_url.clone())
        .or_else(|| config.prefill_base_url.clone())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
    let base_url = match normalize_base_url(&raw_base_url) {
        Ok(base_url) => base_url,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    info!(%base_url, data_dir = %config.data_dir.display(), "console configured");

    let handle = spawn_runtime(secret_store(&config));
    let state = Arc::new(Mutex::new(ConsoleState::new()));
    let pending_intent = Arc::new(Mutex::new(None::<AuthSessionIntent>));

    let event_task = tokio::spawn(run_event_loop(
        handle.subscribe(),
        handle.clone(),
        Arc::clone(&state),
        Arc::clone(&pending_intent),
        profile_path,
    ));

    let mut initialized = false;
    let restore = saved_profile
        .filter(|profile| profile.remember_session && !profile.username.trim().is_empty());
    if let Some(profile) = restore {
        println!("Restoring session for {}...", profile.username);
        *pending_intent.lock().await = Some(AuthSessionIntent {
            base_url: base_url.clone(),
            username: profile.username,
            remember_session: true,
        });
        initialized = send_all(
            &handle,
            startup_restore_command_sequence(&base_url, config.init_config.as_ref()),
        )
        .await;
    } else if let (Some(username), Some(password)) = (
        config.prefill_username.clone(),
        config.prefill_password.clone(),
    ) {
        initialized = start_login(
            &handle,
            &config,
            &base_url,
            &pending_intent,
            initialized,
            username,
            password,
        )
        .await;
    } else {
        println!("swoon console for {base_url}. Type /help for commands.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!(error = %err, "failed reading stdin");
                break;
            }
        };

        let input = match parse_input(&line) {
            Ok(input) => input,
            Err(usage) => {
                println!("{usage}");
                continue;
            }
        };

        let commands: Vec<BackendCommand> = match input {
            ConsoleInput::Empty => continue,
            ConsoleInput::Help => {
                println!("{HELP_TEXT}");
                continue;
            }
            ConsoleInput::Quit => break,
            ConsoleInput::Status => {
                for line in state.lock().await.status_lines() {
                    println!("{line}");
                }
                continue;
            }
            ConsoleInput::Show => {
                let state = state.lock().await;
                if state.selected_thread().is_none() {
                    println!("No conversation is open.");
                }
                for message in state.visible_messages() {
                    println!("{}", format_message(&message));
                }
                continue;
            }
            ConsoleInput::Login { username, password } => {
                initialized = start_login(
                    &handle,
                    &config,
                    &base_url,
                    &pending_intent,
                    initialized,
                    username,
                    password,
                )
                .await;
                continue;
            }
            ConsoleInput::Logout => vec![BackendCommand::Logout],
            ConsoleInput::Threads => vec![BackendCommand::ListThreads],
            ConsoleInput::Open(thread_id) => {
                let mut state = state.lock().await;
                let previous = state.select_thread(thread_id);
                state.clear_error();
                let mut commands = Vec::with_capacity(2);
                if let Some(previous) = previous {
                    commands.push(BackendCommand::CloseThread {
                        thread_id: previous,
                    });
                }
                commands.push(BackendCommand::OpenThread { thread_id });
                commands
            }
            ConsoleInput::Close => match state.lock().await.clear_selection() {
                Some(thread_id) => vec![BackendCommand::CloseThread { thread_id }],
                None => {
                    println!("No conversation is open.");
                    continue;
                }
            },
            ConsoleInput::Refresh => match state.lock().await.selected_thread() {
                Some(thread_id) => vec![BackendCommand::RefreshThread { thread_id }],
                None => {
                    println!("Open a conversation first with /open <thread id>.");
                    continue;
                }
            },
            ConsoleInput::Members { page, search } => vec![BackendCommand::ListMembers {
                page,
                per_page: config.members_page_size,
                search,
            }],
            ConsoleInput::Member(user_id) => vec![BackendCommand::GetMember { user_id }],
            ConsoleInput::Matches => vec![BackendCommand::ListMatches],
            ConsoleInput::Activity { page } => vec![BackendCommand::ListActivity {
                page,
                per_page: ACTIVITY_PAGE_SIZE,
            }],
            ConsoleInput::Profile(user) => vec![BackendCommand::GetProfile { user }],
            ConsoleInput::NewConversation { recipient_id, body } => {
                vec![BackendCommand::StartConversation {
                    recipient_id,
                    subject: None,
                    body,
                }]
            }
            ConsoleInput::Retry => {
                let mut state = state.lock().await;
                match (state.selected_thread(), state.take_compose_restore()) {
                    (Some(thread_id), Some(body)) => {
                        vec![BackendCommand::SendMessage { thread_id, body }]
                    }
                    (None, Some(body)) => {
                        println!("Open a conversation first with /open <thread id>.");
                        state.restore_compose(body);
                        continue;
                    }
                    (_, None) => {
                        println!("Nothing to resend.");
                        continue;
                    }
                }
            }
            ConsoleInput::Send(body) => match state.lock().await.selected_thread() {
                Some(thread_id) => vec![BackendCommand::SendMessage { thread_id, body }],
                None => {
                    println!("Open a conversation first with /open <thread id>.");
                    continue;
                }
            },
        };

        if !send_all(&handle, commands).await {
            break;
        }
    }

    info!("shutting down swoon-console");
    event_task.abort();
    ExitCode::SUCCESS
}

async fn start_login(
    handle: &WpRuntimeHandle,
    config: &ConsoleConfig,
    base_url: &str,
    pending_intent: &Mutex<Option<AuthSessionIntent>>,
    initialized: bool,
    username: String,
    password: String,
) -> bool {
    *pending_intent.lock().await = Some(AuthSessionIntent {
        base_url: base_url.to_owned(),
        username: username.clone(),
        remember_session: config.remember_session,
    });

    // The runtime accepts a single Init; later logins reuse it.
    if initialized {
        return send_all(
            handle,
            [BackendCommand::LoginPassword { username, password }],
        )
        .await;
    }
    send_all(
        handle,
        login_command_sequence(base_url, config.init_config.as_ref(), username, password),
    )
    .await
}

async fn send_all(
    handle: &WpRuntimeHandle,
    commands: impl IntoIterator<Item = BackendCommand>,
) -> bool {
    for command in commands {
        debug!(command = command.kind(), "enqueue backend command");
        if let Err(err) = handle.send(command).await {
            error!(error = %err, "failed to enqueue backend command");
            return false;
        }
    }
    true
}

async fn run_event_loop(
    mut events: EventStream,
    handle: WpRuntimeHandle,
    state: Arc<Mutex<ConsoleState>>,
    pending_intent: Arc<Mutex<Option<AuthSessionIntent>>>,
    profile_path: PathBuf,
) {
    debug!("console event worker started");
    while let Some(event) = next_event(&mut events).await {
        debug!(event = event.kind(), "received backend event");
        match &event {
            BackendEvent::AuthResult { success: true, .. } => {
                send_all(&handle, post_auth_command_sequence()).await;
                if let Some(intent) = pending_intent.lock().await.take() {
                    remember_login(&profile_path, intent);
                }
            }
            BackendEvent::AuthResult { success: false, .. } => {
                pending_intent.lock().await.take();
            }
            BackendEvent::SessionExpired => {
                // Drop the stale token so the next start does not retry it.
                send_all(&handle, [BackendCommand::Logout]).await;
            }
            BackendEvent::StateChanged {
                state: BackendLifecycleState::LoggedOut,
            } => {
                if let Err(err) = clear_auth_profile(&profile_path) {
                    warn!(error = %err, "failed clearing auth profile on logout");
                }
            }
            _ => {}
        }

        let lines = state.lock().await.handle_backend_event(event);
        for line in lines {
            println!("{line}");
        }
    }
    warn!("console event worker exiting: backend event stream closed");
}

fn remember_login(profile_path: &std::path::Path, intent: AuthSessionIntent) {
    if intent.remember_session {
        let profile = AuthProfile {
            base_url: intent.base_url,
            username: intent.username,
            remember_session: true,
        };
        if let Err(err) = save_auth_profile(profile_path, &profile) {
            warn!(error = %err, "failed persisting auth profile after successful login");
        }
    } else if let Err(err) = clear_auth_profile(profile_path) {
        warn!(error = %err, "failed clearing auth profile after non-remembered login");
    }
}

#[cfg(feature = "os-keyring")]
fn secret_store(_config: &ConsoleConfig) -> Arc<dyn SecretStore> {
    info!("using OS keyring for session storage");
    Arc::new(backend_platform::OsKeyringSecretStore)
}

#[cfg(not(feature = "os-keyring"))]
fn secret_store(config: &ConsoleConfig) -> Arc<dyn SecretStore> {
    let path = config.secrets_path();
    info!(path = %path.display(), "using file secret store");
    Arc::new(backend_platform::FileSecretStore::new(path))
}
