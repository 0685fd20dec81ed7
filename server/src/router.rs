//! Per-session chat loop: flood gate, command interpretation, delivery
//!
//! Each authenticated connection runs exactly one `Router`, which is the only
//! reader of that connection. Replies and broadcasts never touch a socket
//! directly; they are queued on the target sessions and written by each
//! session's writer task.

use crate::registry::{FanOut, Session, SessionRegistry};
use futures::{Stream, StreamExt};
use log::{debug, info};
use shared::{error_line, public_line, whisper_line, HELP_TEXT, INFO_PREFIX};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::codec::LinesCodecError;

const WHISPER_COMMAND: &str = "whisper ";

/// One interpreted input line
#[derive(Debug, PartialEq, Eq)]
pub enum ChatCommand<'a> {
    Exit,
    Help,
    Whisper { dest: &'a str, message: &'a str },
    MalformedWhisper,
    Public(&'a str),
    Empty,
}

impl<'a> ChatCommand<'a> {
    /// Interprets an already trimmed line
    pub fn parse(line: &'a str) -> Self {
        if line.is_empty() {
            return ChatCommand::Empty;
        }
        if line.eq_ignore_ascii_case("exit") {
            return ChatCommand::Exit;
        }
        if line.eq_ignore_ascii_case("help") {
            return ChatCommand::Help;
        }
        if let Some(rest) = line.strip_prefix(WHISPER_COMMAND) {
            return parse_whisper(rest);
        }
        ChatCommand::Public(line)
    }
}

/// Splits `<dest> <message...>`, keeping the message text as typed
pub(crate) fn parse_whisper(rest: &str) -> ChatCommand<'_> {
    let rest = rest.trim_start();
    match rest.split_once(char::is_whitespace) {
        Some((dest, message)) if !message.trim().is_empty() => ChatCommand::Whisper {
            dest,
            message: message.trim_start(),
        },
        _ => ChatCommand::MalformedWhisper,
    }
}

/// Per-session rate limit on accepted lines
#[derive(Debug)]
pub struct FloodGate {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl FloodGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    /// Returns true and records `now` when the line may be processed
    ///
    /// Rejected lines leave the timestamp untouched.
    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }
}

/// What the loop should do after a line
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Router {
    session: Arc<Session>,
    registry: SessionRegistry,
    gate: FloodGate,
}

impl Router {
    pub fn new(session: Arc<Session>, registry: SessionRegistry, flood_interval: Duration) -> Self {
        Self {
            session,
            registry,
            gate: FloodGate::new(flood_interval),
        }
    }

    /// Reads lines until exit, disconnect, read error, or the session closes
    pub async fn run<R>(&mut self, lines: &mut R)
    where
        R: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    {
        let closed = self.session.close_signal();

        loop {
            let line = tokio::select! {
                _ = closed.cancelled() => break,
                next = lines.next() => match next {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => {
                        debug!("Read error for {}: {}", self.session.pseudo(), e);
                        break;
                    }
                    None => break,
                },
            };

            if self.handle_line(&line, Instant::now()) == Flow::Exit {
                break;
            }
        }
    }

    pub fn handle_line(&mut self, raw: &str, now: Instant) -> Flow {
        if !self.gate.admit(now) {
            self.reply(error_line("Flood detected: 1 message/sec max."));
            return Flow::Continue;
        }

        match ChatCommand::parse(raw.trim()) {
            ChatCommand::Exit => return Flow::Exit,
            ChatCommand::Help => self.reply(HELP_TEXT.to_string()),
            ChatCommand::Whisper { dest, message } => self.whisper(dest, message),
            ChatCommand::MalformedWhisper => {
                self.reply(error_line("Format: whisper <pseudo> <message>"))
            }
            ChatCommand::Public(text) => {
                let line = public_line(self.session.pseudo(), text);
                info!("{}", line);
                self.registry.broadcast(&line);
            }
            ChatCommand::Empty => {}
        }
        Flow::Continue
    }

    fn whisper(&self, dest: &str, message: &str) {
        let sender = self.session.pseudo();
        if dest == sender {
            self.reply(error_line("You can't whisper to yourself."));
            return;
        }

        match self.registry.lookup(dest) {
            Some(target) => {
                let line = whisper_line(sender, dest, message);
                info!("{}", line);
                target.send(line);
                self.reply(format!("{} Whisper sent to {}", INFO_PREFIX, dest));
            }
            None => self.reply(error_line(&format!("No user '{}'.", dest))),
        }
    }

    fn reply(&self, line: String) {
        self.session.send(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line.to_string());
        }
        lines
    }

    struct Fixture {
        registry: SessionRegistry,
        router: Router,
        own_rx: mpsc::Receiver<Arc<str>>,
    }

    fn fixture(pseudo: &str) -> Fixture {
        let registry = SessionRegistry::new();
        let (session, own_rx) = registry.open_session(pseudo);
        registry.try_insert(Arc::clone(&session));
        let router = Router::new(session, registry.clone(), Duration::from_secs(1));
        Fixture {
            registry,
            router,
            own_rx,
        }
    }

    fn join(registry: &SessionRegistry, pseudo: &str) -> mpsc::Receiver<Arc<str>> {
        let (session, mut rx) = registry.open_session(pseudo);
        registry.try_insert(session);
        drain(&mut rx);
        rx
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ChatCommand::parse("exit"), ChatCommand::Exit);
        assert_eq!(ChatCommand::parse("EXIT"), ChatCommand::Exit);
        assert_eq!(ChatCommand::parse("Help"), ChatCommand::Help);
        assert_eq!(ChatCommand::parse(""), ChatCommand::Empty);
        assert_eq!(ChatCommand::parse("hello"), ChatCommand::Public("hello"));
        assert_eq!(ChatCommand::parse("exit now"), ChatCommand::Public("exit now"));
    }

    #[test]
    fn test_parse_whisper() {
        assert_eq!(
            ChatCommand::parse("whisper bob hi there"),
            ChatCommand::Whisper {
                dest: "bob",
                message: "hi there"
            }
        );
        assert_eq!(
            ChatCommand::parse("whisper   bob   spaced  out"),
            ChatCommand::Whisper {
                dest: "bob",
                message: "spaced  out"
            }
        );
        assert_eq!(ChatCommand::parse("whisper bob"), ChatCommand::MalformedWhisper);
        // Prefix is case-sensitive and needs the space
        assert_eq!(ChatCommand::parse("Whisper bob hi"), ChatCommand::Public("Whisper bob hi"));
        assert_eq!(ChatCommand::parse("whisper"), ChatCommand::Public("whisper"));
    }

    #[test]
    fn test_flood_gate() {
        let mut gate = FloodGate::new(Duration::from_secs(1));
        let start = Instant::now();

        assert!(gate.admit(start));
        assert!(!gate.admit(start + Duration::from_millis(500)));
        // The rejected line did not move the window
        assert!(gate.admit(start + Duration::from_millis(1000)));
        assert!(!gate.admit(start + Duration::from_millis(1999)));
        assert!(gate.admit(start + Duration::from_millis(2000)));
    }

    #[test]
    fn test_public_message_reaches_everyone() {
        let mut fx = fixture("alice");
        let mut bob_rx = join(&fx.registry, "bob");
        drain(&mut fx.own_rx);

        assert_eq!(fx.router.handle_line("hello world", Instant::now()), Flow::Continue);

        let own = drain(&mut fx.own_rx);
        let bob = drain(&mut bob_rx);
        assert_eq!(own.len(), 1);
        assert!(own[0].ends_with("] alice : hello world"));
        assert_eq!(own, bob);
    }

    #[test]
    fn test_flood_rejection_is_private() {
        let mut fx = fixture("alice");
        let mut bob_rx = join(&fx.registry, "bob");
        drain(&mut fx.own_rx);
        let now = Instant::now();

        fx.router.handle_line("first", now);
        fx.router.handle_line("second", now + Duration::from_millis(200));

        let own = drain(&mut fx.own_rx);
        assert_eq!(own.len(), 2);
        assert_eq!(own[1], "[ERROR] Flood detected: 1 message/sec max.");

        let bob = drain(&mut bob_rx);
        assert_eq!(bob.len(), 1);
        assert!(bob[0].ends_with("alice : first"));
    }

    #[test]
    fn test_flood_gate_applies_to_exit() {
        let mut fx = fixture("alice");
        let now = Instant::now();

        fx.router.handle_line("hi", now);
        assert_eq!(fx.router.handle_line("exit", now), Flow::Continue);
        assert_eq!(
            fx.router.handle_line("exit", now + Duration::from_secs(1)),
            Flow::Exit
        );
    }

    #[test]
    fn test_help_is_private() {
        let mut fx = fixture("alice");
        let mut bob_rx = join(&fx.registry, "bob");
        drain(&mut fx.own_rx);

        fx.router.handle_line("help", Instant::now());

        assert_eq!(drain(&mut fx.own_rx), vec![HELP_TEXT.to_string()]);
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[test]
    fn test_whisper_delivery_is_private() {
        let mut fx = fixture("alice");
        let mut bob_rx = join(&fx.registry, "bob");
        let mut carol_rx = join(&fx.registry, "carol");
        drain(&mut fx.own_rx);
        drain(&mut bob_rx);

        fx.router.handle_line("whisper bob meet at noon", Instant::now());

        let bob = drain(&mut bob_rx);
        assert_eq!(bob.len(), 1);
        assert!(bob[0].starts_with("[WHISPER] ["));
        assert!(bob[0].ends_with("alice -> bob: meet at noon"));

        assert_eq!(
            drain(&mut fx.own_rx),
            vec!["[INFO] Whisper sent to bob".to_string()]
        );
        assert!(drain(&mut carol_rx).is_empty());
    }

    #[test]
    fn test_whisper_errors() {
        let mut fx = fixture("alice");
        drain(&mut fx.own_rx);
        let start = Instant::now();

        fx.router.handle_line("whisper alice hi me", start);
        fx.router.handle_line("whisper ghost boo", start + Duration::from_secs(1));
        fx.router.handle_line("whisper bob", start + Duration::from_secs(2));

        assert_eq!(
            drain(&mut fx.own_rx),
            vec![
                "[ERROR] You can't whisper to yourself.".to_string(),
                "[ERROR] No user 'ghost'.".to_string(),
                "[ERROR] Format: whisper <pseudo> <message>".to_string(),
            ]
        );
    }

    #[test]
    fn test_empty_line_is_ignored() {
        let mut fx = fixture("alice");
        drain(&mut fx.own_rx);

        assert_eq!(fx.router.handle_line("   ", Instant::now()), Flow::Continue);
        assert!(drain(&mut fx.own_rx).is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_exit_and_eof() {
        let mut fx = fixture("alice");
        let mut lines = futures::stream::iter(vec![Ok("exit".to_string()), Ok("after".to_string())]);

        fx.router.run(&mut lines).await;

        // "after" was never consumed
        assert!(lines.next().await.is_some());

        let mut empty = futures::stream::iter(Vec::<Result<String, LinesCodecError>>::new());
        fx.router.run(&mut empty).await;
    }

    #[tokio::test]
    async fn test_run_stops_when_session_closes() {
        let fx = fixture("alice");
        let mut router = fx.router;
        fx.registry.kick("alice");

        let mut pending = futures::stream::pending::<Result<String, LinesCodecError>>();
        tokio::time::timeout(Duration::from_secs(1), router.run(&mut pending))
            .await
            .expect("router should exit once the session is closed");
    }
}
