//! Line-oriented console front end
//!
//! Parses one input line into a [`ConsoleInput`] and renders
//! [`AppEvent`]s as text. Peers can be named by id or by display name.

use crate::application::{AppEvent, Command, Snapshot};
use crate::domain::call::SessionEvent;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{Language, PeerId};
use thiserror::Error;

pub const HELP: &str = "\
commands:
  join <name>            join the directory
  leave                  leave the directory
  peers                  list participants
  call <peer>            call a participant (id or name)
  accept | reject        decide on the incoming call
  hangup <peer>          end a call
  say <text>             relay text to everybody
  tell <peer> <text>     relay text to one participant
  speak <text>           recognize an utterance and relay it
  lang speak|hear en|ja  change a language
  ask <prompt>           ask the assistant
  status                 show calls and languages
  log                    show received utterances
  help | quit";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("unknown command: {0} (try `help`)")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    #[error("no participant matches {0}")]
    NoSuchPeer(String),

    #[error("{0} matches more than one participant, use the id")]
    AmbiguousPeer(String),
}

/// A peer as typed by the user, resolved against the roster later
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRef(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Command(Command),
    Call(PeerRef),
    Hangup(PeerRef),
    Tell(PeerRef, String),
    /// Text standing in for a spoken utterance
    Speak(String),
    Peers,
    Status,
    Log,
    Help,
    Quit,
    Empty,
}

fn rest<'a>(line: &'a str, keyword: &str) -> &'a str {
    line[keyword.len()..].trim()
}

fn non_empty(text: &str, usage: &'static str) -> Result<String, ConsoleError> {
    if text.is_empty() {
        Err(ConsoleError::Usage(usage))
    } else {
        Ok(text.to_string())
    }
}

pub fn parse(line: &str) -> Result<ConsoleInput, ConsoleError> {
    let line = line.trim();
    let keyword = line.split_whitespace().next().unwrap_or("");

    let input = match keyword.to_ascii_lowercase().as_str() {
        "" => ConsoleInput::Empty,
        "join" => ConsoleInput::Command(Command::Join {
            name: non_empty(rest(line, keyword), "join <name>")?,
        }),
        "leave" => ConsoleInput::Command(Command::Leave),
        "peers" | "roster" => ConsoleInput::Peers,
        "call" => ConsoleInput::Call(PeerRef(non_empty(rest(line, keyword), "call <peer>")?)),
        "accept" => ConsoleInput::Command(Command::AcceptIncoming),
        "reject" => ConsoleInput::Command(Command::RejectIncoming),
        "hangup" => ConsoleInput::Hangup(PeerRef(non_empty(rest(line, keyword), "hangup <peer>")?)),
        "say" => ConsoleInput::Command(Command::RelayText {
            to: None,
            text: non_empty(rest(line, keyword), "say <text>")?,
        }),
        "tell" => {
            let args = rest(line, keyword);
            let (peer, text) = args
                .split_once(char::is_whitespace)
                .ok_or(ConsoleError::Usage("tell <peer> <text>"))?;
            ConsoleInput::Tell(PeerRef(peer.to_string()), non_empty(text.trim(), "tell <peer> <text>")?)
        }
        "speak" => ConsoleInput::Speak(non_empty(rest(line, keyword), "speak <text>")?),
        "lang" => {
            let mut args = rest(line, keyword).split_whitespace();
            let (Some(which), Some(code), None) = (args.next(), args.next(), args.next()) else {
                return Err(ConsoleError::Usage("lang speak|hear en|ja"));
            };
            let language = Language::parse(code).ok_or_else(|| ConsoleError::UnknownLanguage(code.to_string()))?;
            match which.to_ascii_lowercase().as_str() {
                "speak" => ConsoleInput::Command(Command::SetLanguage {
                    speak: Some(language),
                    hear: None,
                }),
                "hear" => ConsoleInput::Command(Command::SetLanguage {
                    speak: None,
                    hear: Some(language),
                }),
                _ => return Err(ConsoleError::Usage("lang speak|hear en|ja")),
            }
        }
        "ask" => ConsoleInput::Command(Command::Ask {
            prompt: non_empty(rest(line, keyword), "ask <prompt>")?,
        }),
        "status" => ConsoleInput::Status,
        "log" => ConsoleInput::Log,
        "help" | "?" => ConsoleInput::Help,
        "quit" | "exit" => ConsoleInput::Quit,
        _ => return Err(ConsoleError::UnknownCommand(keyword.to_string())),
    };
    Ok(input)
}

/// Match by exact id first, then by display name ignoring case
pub fn resolve_peer(reference: &PeerRef, snapshot: &Snapshot) -> Result<PeerId, ConsoleError> {
    let wanted = reference.0.trim();

    if let Some(peer) = snapshot.roster.iter().find(|p| p.id.as_str() == wanted) {
        return Ok(peer.id.clone());
    }
    if let Some(session) = snapshot.sessions.iter().find(|s| s.peer_id.as_str() == wanted) {
        return Ok(session.peer_id.clone());
    }

    let mut by_name = snapshot
        .roster
        .iter()
        .filter(|p| p.label().eq_ignore_ascii_case(wanted));
    match (by_name.next(), by_name.next()) {
        (Some(peer), None) => Ok(peer.id.clone()),
        (Some(_), Some(_)) => Err(ConsoleError::AmbiguousPeer(wanted.to_string())),
        _ => Err(ConsoleError::NoSuchPeer(wanted.to_string())),
    }
}

fn describe_error(error: &DomainError) -> String {
    match error {
        DomainError::CapabilityUnavailable(what) => format!("not available: {}", what),
        DomainError::ExternalService(what) => format!("service error: {}", what),
        other => other.to_string(),
    }
}

/// Text for one event, or `None` for events not worth a line
pub fn render(event: &AppEvent) -> Option<String> {
    let text = match event {
        AppEvent::Joined { id, name } => format!("joined as {} ({})", name, id),
        AppEvent::Left => "left the directory".to_string(),
        AppEvent::RosterChanged(peers) if peers.is_empty() => "nobody else is here".to_string(),
        AppEvent::RosterChanged(peers) => format!(
            "here: {}",
            peers
                .iter()
                .map(|p| p.label().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        AppEvent::Session(event) => match event {
            SessionEvent::Requested { peer_id, .. } => format!("calling {}...", peer_id),
            SessionEvent::Accepted { peer_id, .. } => format!("call with {} accepted", peer_id),
            SessionEvent::Negotiating { .. } => return None,
            SessionEvent::Active { peer_id, .. } => format!("in call with {}", peer_id),
            SessionEvent::Terminated { peer_id, reason, .. } => format!("call with {} ended: {}", peer_id, reason),
        },
        AppEvent::IncomingCall(request) => {
            format!("incoming call from {} (accept / reject)", request.label())
        }
        AppEvent::IncomingQueued { request, position } => {
            format!("{} is also calling ({} waiting)", request.label(), position)
        }
        AppEvent::IncomingWithdrawn { from } => format!("{} stopped calling", from),
        AppEvent::Relayed(entry) => entry.line(),
        AppEvent::AssistantReply { text, .. } => format!("assistant: {}", text),
        AppEvent::LanguageChanged { speak, hear } => format!("speak {} / hear {}", speak, hear),
        AppEvent::Notice(message) => format!("* {}", message),
        AppEvent::Error(error) => format!("! {}", describe_error(error)),
    };
    Some(text)
}

/// Multi-line status block
pub fn render_status(snapshot: &Snapshot) -> String {
    let mut lines = vec![format!(
        "{} ({}) speak {} / hear {}{}",
        snapshot.display_name.as_deref().unwrap_or("(not joined)"),
        snapshot.self_id,
        snapshot.speak,
        snapshot.hear,
        if snapshot.receive_only { ", receive-only" } else { "" }
    )];

    for session in snapshot.sessions.iter().filter(|s| !s.state.is_terminated()) {
        lines.push(format!(
            "  {} [{}] {} ({:?})",
            session.peer_name,
            session.peer_id,
            session.state.as_str(),
            session.role
        ));
    }
    if let Some(incoming) = &snapshot.incoming {
        lines.push(format!(
            "  incoming: {} (+{} waiting)",
            incoming.label(),
            snapshot.queued_incoming
        ));
    }
    if snapshot.assistant_pending {
        lines.push("  assistant: waiting for a reply".to_string());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::SessionView;
    use crate::domain::call::{CallRole, CallState};
    use crate::domain::directory::Participant;

    fn snapshot(roster: Vec<Participant>) -> Snapshot {
        Snapshot {
            self_id: PeerId::new("me"),
            display_name: Some("Me".into()),
            roster,
            sessions: vec![],
            incoming: None,
            queued_incoming: 0,
            log: vec![],
            speak: Language::En,
            hear: Language::Ja,
            receive_only: false,
            assistant_pending: false,
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse("join  Alice Smith ").unwrap(),
            ConsoleInput::Command(Command::Join {
                name: "Alice Smith".into()
            })
        );
        assert_eq!(parse("call bob").unwrap(), ConsoleInput::Call(PeerRef("bob".into())));
        assert_eq!(
            parse("tell bob hello there").unwrap(),
            ConsoleInput::Tell(PeerRef("bob".into()), "hello there".into())
        );
        assert_eq!(
            parse("lang hear ja").unwrap(),
            ConsoleInput::Command(Command::SetLanguage {
                speak: None,
                hear: Some(Language::Ja)
            })
        );
        assert_eq!(parse("").unwrap(), ConsoleInput::Empty);
        assert_eq!(parse("QUIT").unwrap(), ConsoleInput::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("join").unwrap_err(), ConsoleError::Usage("join <name>"));
        assert_eq!(parse("tell bob").unwrap_err(), ConsoleError::Usage("tell <peer> <text>"));
        assert_eq!(
            parse("lang hear fr").unwrap_err(),
            ConsoleError::UnknownLanguage("fr".into())
        );
        assert_eq!(parse("dance").unwrap_err(), ConsoleError::UnknownCommand("dance".into()));
    }

    #[test]
    fn test_resolve_by_id_then_name() {
        let snapshot = snapshot(vec![
            Participant::new(PeerId::new("p1"), "Alice"),
            Participant::new(PeerId::new("p2"), "Bob"),
            Participant::new(PeerId::new("p3"), "bob"),
        ]);

        assert_eq!(resolve_peer(&PeerRef("p2".into()), &snapshot).unwrap(), PeerId::new("p2"));
        assert_eq!(resolve_peer(&PeerRef("alice".into()), &snapshot).unwrap(), PeerId::new("p1"));
        assert_eq!(
            resolve_peer(&PeerRef("BOB".into()), &snapshot).unwrap_err(),
            ConsoleError::AmbiguousPeer("BOB".into())
        );
        assert_eq!(
            resolve_peer(&PeerRef("carol".into()), &snapshot).unwrap_err(),
            ConsoleError::NoSuchPeer("carol".into())
        );
    }

    #[test]
    fn test_resolve_peer_with_session_after_it_left() {
        let mut snapshot = snapshot(vec![]);
        snapshot.sessions.push(SessionView {
            peer_id: PeerId::new("p9"),
            peer_name: "Zed".into(),
            role: CallRole::Callee,
            state: CallState::Active,
            local_tracks: 1,
        });
        assert_eq!(resolve_peer(&PeerRef("p9".into()), &snapshot).unwrap(), PeerId::new("p9"));
    }

    #[test]
    fn test_render_events() {
        assert_eq!(
            render(&AppEvent::Error(DomainError::CapabilityUnavailable("microphone".into()))).unwrap(),
            "! not available: microphone"
        );
        assert_eq!(
            render(&AppEvent::RosterChanged(vec![Participant::new(PeerId::new("p1"), "")])).unwrap(),
            "here: p1"
        );
    }

    #[test]
    fn test_render_status() {
        let mut snapshot = snapshot(vec![]);
        snapshot.sessions.push(SessionView {
            peer_id: PeerId::new("p2"),
            peer_name: "Bob".into(),
            role: CallRole::Caller,
            state: CallState::Negotiating,
            local_tracks: 1,
        });
        assert_eq!(
            render_status(&snapshot),
            "Me (me) speak en / hear ja\n  Bob [p2] negotiating (Caller)"
        );

        snapshot.assistant_pending = true;
        assert!(render_status(&snapshot).ends_with("\n  assistant: waiting for a reply"));
    }
}
