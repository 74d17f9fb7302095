//! Line-oriented front end: parses typed commands and renders broadcasts.

use std::fmt::Write as _;
use tunedeck_proto::model::{PlaybackStatus, UploadPhase, View};
use tunedeck_proto::protocol::{Broadcast, ClientState, Command};

pub const HELP: &str = "\
commands:
  login <user> <password>     logout
  register <user> <email> <password>
  view <music|favorites|admin>  refresh
  fav <id>                    play <id>      stop
  file <path>                 details <title> | <creator> | <category>
  upload                      submit
  state                       help           quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ShellInput {
    Command(Command),
    Help,
    Quit,
    Empty,
}

fn id_arg(verb: &str, rest: &str) -> Result<i64, String> {
    rest.trim()
        .parse()
        .map_err(|_| format!("usage: {} <id>", verb))
}

pub fn parse_line(line: &str) -> Result<ShellInput, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ShellInput::Empty);
    }
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let cmd = match verb {
        "quit" | "exit" => return Ok(ShellInput::Quit),
        "help" | "?" => return Ok(ShellInput::Help),
        "login" => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(username), Some(password), None) => Command::Login {
                    username: username.to_string(),
                    password: password.to_string(),
                },
                _ => return Err("usage: login <user> <password>".to_string()),
            }
        }
        "register" => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(username), Some(email), Some(password), None) => Command::Register {
                    username: username.to_string(),
                    email: email.to_string(),
                    password: password.to_string(),
                },
                _ => return Err("usage: register <user> <email> <password>".to_string()),
            }
        }
        "logout" => Command::Logout,
        "view" => Command::SelectView {
            view: rest
                .parse::<View>()
                .map_err(|_| "usage: view <music|favorites|admin>".to_string())?,
        },
        "refresh" => Command::Refresh,
        "fav" => Command::ToggleFavorite {
            item_id: id_arg("fav", rest)?,
        },
        "play" => Command::Play {
            item_id: id_arg("play", rest)?,
        },
        "stop" => Command::Stop,
        "file" if !rest.is_empty() => Command::SelectFile {
            path: rest.to_string(),
        },
        "file" => return Err("usage: file <path>".to_string()),
        "details" => {
            let fields: Vec<&str> = rest.split('|').map(str::trim).collect();
            match fields.as_slice() {
                [title, creator] => Command::SetDetails {
                    title: title.to_string(),
                    creator_name: creator.to_string(),
                    category: String::new(),
                },
                [title, creator, category] => Command::SetDetails {
                    title: title.to_string(),
                    creator_name: creator.to_string(),
                    category: category.to_string(),
                },
                _ => return Err("usage: details <title> | <creator> | <category>".to_string()),
            }
        }
        "upload" => Command::Upload,
        "submit" => Command::Submit,
        "state" => Command::GetState,
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };
    Ok(ShellInput::Command(cmd))
}

pub fn render_state(state: &ClientState) -> String {
    let mut out = String::new();
    let who = match &state.identity {
        Some(i) if i.is_admin => format!("{} (admin)", i.username),
        Some(i) => i.username.clone(),
        None => "not logged in".to_string(),
    };
    let playing = match (&state.playback, state.playback_status) {
        (Some(p), PlaybackStatus::Playing) => format!("playing #{}", p.item_id),
        (Some(p), _) => format!("loaded #{}", p.item_id),
        (None, _) => "idle".to_string(),
    };
    let _ = writeln!(
        out,
        "[{}] {} | {} | {}",
        state.rev, who, state.active_view, playing
    );

    if state.active_view == View::Admin {
        let u = &state.upload;
        let _ = writeln!(
            out,
            "  draft: {:?} file={} uploaded={} title={:?} creator={:?} category={:?}",
            u.phase,
            u.file_name.as_deref().unwrap_or("-"),
            u.uploaded_path.as_deref().unwrap_or("-"),
            u.title,
            u.creator_name,
            u.category,
        );
        if let Some(e) = &u.last_error {
            let _ = writeln!(out, "  last error: {}", e);
        }
        if u.phase == UploadPhase::Committed {
            let _ = writeln!(out, "  committed");
        }
        return out;
    }

    match &state.catalog {
        None => {
            let _ = writeln!(out, "  (not loaded)");
        }
        Some(items) if items.is_empty() => {
            let _ = writeln!(out, "  (empty)");
        }
        Some(items) => {
            let current = state.playback.as_ref().map(|p| p.item_id);
            for item in items {
                let marker = if Some(item.id) == current { '>' } else { ' ' };
                let _ = write!(
                    out,
                    "{} {:>4}  {} - {}",
                    marker, item.id, item.title, item.creator_name
                );
                if let Some(category) = &item.category {
                    let _ = write!(out, " [{}]", category);
                }
                if item.file_path.is_none() {
                    let _ = write!(out, " (no file)");
                }
                out.push('\n');
            }
        }
    }
    out
}

pub fn render(msg: &Broadcast) -> String {
    match msg {
        Broadcast::State { data } => render_state(data),
        Broadcast::Error { kind, message } => format!("error ({}): {}\n", kind.label(), message),
        Broadcast::Log { message } => format!("- {}\n", message),
    }
}
