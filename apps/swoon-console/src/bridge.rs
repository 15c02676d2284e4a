//! Maps console input lines to backend commands.

use backend_core::{BackendCommand, BackendInitConfig, ProfileTarget, ThreadId, UserId};
use url::Url;

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Empty,
    Help,
    Quit,
    Status,
    /// Reprint the open conversation.
    Show,
    Login { username: String, password: String },
    Logout,
    Threads,
    Open(ThreadId),
    Close,
    Refresh,
    Members { page: u32, search: Option<String> },
    Member(UserId),
    Matches,
    Activity { page: u32 },
    /// Member card with extended profile; no id means the logged-in account.
    Profile(ProfileTarget),
    NewConversation { recipient_id: UserId, body: String },
    /// Resend the text of the last failed send.
    Retry,
    /// Plain text goes to the selected thread.
    Send(String),
}

pub const HELP_TEXT: &str = "\
/login <user> <password>   log in (remembered unless SWOON_REMEMBER_SESSION=false)
/threads                   list conversations
/open <thread id>          open a conversation and follow it
/show                      print the open conversation again
/close                     stop following the open conversation
/refresh                   fetch the open conversation now
/members [page] [search]   browse members
/member <user id>          show one member
/matches                   list matches
/activity [page]           site activity stream
/profile [user id]         full profile, yours without an id
/new <user id> <text>      message a member
/retry                     resend the last failed message
/status                    connection and login status
/logout                    log out and forget the session
/quit                      exit
anything else              send to the open conversation";

pub fn parse_input(line: &str) -> Result<ConsoleInput, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleInput::Empty);
    }
    let Some(command_line) = line.strip_prefix('/') else {
        return Ok(ConsoleInput::Send(line.to_owned()));
    };

    let (command, rest) = command_line
        .split_once(char::is_whitespace)
        .map(|(command, rest)| (command, rest.trim()))
        .unwrap_or((command_line, ""));

    match command {
        "help" | "?" => Ok(ConsoleInput::Help),
        "quit" | "exit" => Ok(ConsoleInput::Quit),
        "status" => Ok(ConsoleInput::Status),
        "show" => Ok(ConsoleInput::Show),
        "login" => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(username), Some(password)) => Ok(ConsoleInput::Login {
                    username: username.to_owned(),
                    password: password.to_owned(),
                }),
                _ => Err("usage: /login <user> <password>".to_owned()),
            }
        }
        "logout" => Ok(ConsoleInput::Logout),
        "threads" => Ok(ConsoleInput::Threads),
        "open" => parse_id(rest, "usage: /open <thread id>").map(ConsoleInput::Open),
        "close" => Ok(ConsoleInput::Close),
        "refresh" => Ok(ConsoleInput::Refresh),
        "members" => {
            let (first, remainder) = rest
                .split_once(char::is_whitespace)
                .map(|(first, remainder)| (first, remainder.trim()))
                .unwrap_or((rest, ""));
            let (page, search) = match first.parse::<u32>() {
                Ok(page) => (page.max(1), remainder),
                Err(_) => (1, rest),
            };
            Ok(ConsoleInput::Members {
                page,
                search: (!search.is_empty()).then(|| search.to_owned()),
            })
        }
        "member" => parse_id(rest, "usage: /member <user id>").map(ConsoleInput::Member),
        "matches" => Ok(ConsoleInput::Matches),
        "activity" if rest.is_empty() => Ok(ConsoleInput::Activity { page: 1 }),
        "activity" => rest
            .parse::<u32>()
            .map(|page| ConsoleInput::Activity { page: page.max(1) })
            .map_err(|_| "usage: /activity [page]".to_owned()),
        "profile" if rest.is_empty() => Ok(ConsoleInput::Profile(ProfileTarget::Me)),
        "profile" => parse_id(rest, "usage: /profile [user id]")
            .map(|user_id| ConsoleInput::Profile(ProfileTarget::User(user_id))),
        "new" => {
            let usage = "usage: /new <user id> <text>";
            let (id, body) = rest.split_once(char::is_whitespace).ok_or(usage)?;
            let body = body.trim();
            if body.is_empty() {
                return Err(usage.to_owned());
            }
            Ok(ConsoleInput::NewConversation {
                recipient_id: parse_id(id, usage)?,
                body: body.to_owned(),
            })
        }
        "retry" => Ok(ConsoleInput::Retry),
        other => Err(format!("unknown command /{other}; try /help")),
    }
}

fn parse_id(raw: &str, usage: &str) -> Result<u64, String> {
    raw.trim()
        .trim_start_matches(['#', '@'])
        .parse::<u64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| usage.to_owned())
}

/// Accept `example.org`, `https://example.org` or a full REST root, and return
/// the REST root without a trailing slash.
pub fn normalize_base_url(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("A site address is required.".to_owned());
    }

    let candidate = if raw.contains("://") {
        raw.to_owned()
    } else {
        format!("https://{raw}")
    };
    let mut parsed = Url::parse(&candidate).map_err(|err| format!("Invalid site URL: {err}"))?;
    if !matches!(parsed.scheme(), "https" | "http") {
        return Err("Only http and https sites are supported.".to_owned());
    }
    if parsed.host_str().is_none() {
        return Err("Site URL must include a host, for example example.org.".to_owned());
    }
    if parsed.path() == "/" || parsed.path().is_empty() {
        parsed.set_path("wp-json");
    }

    Ok(parsed.as_str().trim_end_matches('/').to_owned())
}

pub fn startup_restore_command_sequence(
    base_url: &str,
    init_config: Option<&BackendInitConfig>,
) -> [BackendCommand; 2] {
    [
        init_command(base_url, init_config),
        BackendCommand::RestoreSession,
    ]
}

pub fn login_command_sequence(
    base_url: &str,
    init_config: Option<&BackendInitConfig>,
    username: String,
    password: String,
) -> [BackendCommand; 2] {
    [
        init_command(base_url, init_config),
        BackendCommand::LoginPassword { username, password },
    ]
}

pub fn post_auth_command_sequence() -> [BackendCommand; 1] {
    [BackendCommand::ListThreads]
}

fn init_command(base_url: &str, init_config: Option<&BackendInitConfig>) -> BackendCommand {
    BackendCommand::Init {
        base_url: base_url.to_owned(),
        config: init_config.cloned(),
    }
}
