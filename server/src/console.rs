//! Operator console reading commands from the server's terminal
//!
//! Commands act on the shared session registry and drive the frame
//! broadcaster. Replies are plain lines for the operator; nothing here writes
//! to a client socket except through session queues.

use crate::animation::{FrameBroadcaster, PlaybackState, Transition};
use crate::registry::{FanOut, SessionRegistry};
use crate::router::{parse_whisper, ChatCommand};
use log::{info, warn};
use shared::{admin_line, clock_stamp, whisper_line, CLEAR_SCREEN, SHUTDOWN_NOTICE};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const OPERATOR_NAME: &str = "Admin";

pub const CONSOLE_HELP: &str = "Available commands: kick <pseudo>, exit, list, clear, \
say <msg>, whisper <pseudo> <msg>, badapple, pausebadapple, resumebadapple, stopbadapple";

#[derive(Debug, PartialEq, Eq)]
pub enum OperatorCommand<'a> {
    Kick(&'a str),
    List,
    Say(&'a str),
    Whisper { dest: &'a str, message: &'a str },
    MalformedWhisper,
    StartAnimation,
    PauseAnimation,
    ResumeAnimation,
    StopAnimation,
    Clear,
    Help,
    Exit,
    Unknown(&'a str),
    Empty,
}

impl<'a> OperatorCommand<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return OperatorCommand::Empty;
        }

        if let Some(pseudo) = line.strip_prefix("kick ") {
            let pseudo = pseudo.trim();
            if !pseudo.is_empty() {
                return OperatorCommand::Kick(pseudo);
            }
        }
        if let Some(message) = line.strip_prefix("say ") {
            return OperatorCommand::Say(message.trim());
        }
        if let Some(rest) = line.strip_prefix("whisper ") {
            return match parse_whisper(rest) {
                ChatCommand::Whisper { dest, message } => OperatorCommand::Whisper { dest, message },
                _ => OperatorCommand::MalformedWhisper,
            };
        }

        match line.to_ascii_lowercase().as_str() {
            "list" => OperatorCommand::List,
            "clear" => OperatorCommand::Clear,
            "help" => OperatorCommand::Help,
            "exit" => OperatorCommand::Exit,
            "badapple" => OperatorCommand::StartAnimation,
            "pausebadapple" => OperatorCommand::PauseAnimation,
            "resumebadapple" => OperatorCommand::ResumeAnimation,
            "stopbadapple" => OperatorCommand::StopAnimation,
            _ => OperatorCommand::Unknown(line),
        }
    }
}

/// Lines to show the operator, and whether the console keeps reading
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConsoleReply {
    pub lines: Vec<String>,
    pub exit: bool,
}

impl ConsoleReply {
    fn line(text: impl Into<String>) -> Self {
        Self {
            lines: vec![text.into()],
            exit: false,
        }
    }

    fn stamped(text: &str) -> Self {
        Self::line(format!("{} {}", clock_stamp(), text))
    }
}

pub struct Console {
    registry: SessionRegistry,
    animation: FrameBroadcaster,
    shutdown: CancellationToken,
}

impl Console {
    pub fn new(
        registry: SessionRegistry,
        animation: FrameBroadcaster,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            animation,
            shutdown,
        }
    }

    pub fn animation_state(&self) -> PlaybackState {
        self.animation.state()
    }

    /// Reads commands until `exit`, end of input, or server shutdown
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();

        loop {
            let line = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                info!("Console input closed");
                break;
            };

            let reply = self.execute(OperatorCommand::parse(&line)).await;
            for text in &reply.lines {
                output.write_all(text.as_bytes()).await?;
                output.write_all(b"\n").await?;
            }
            output.flush().await?;

            if reply.exit {
                break;
            }
        }

        if self.animation.state() != PlaybackState::Stopped {
            self.animation.stop().await;
        }
        Ok(())
    }

    pub async fn execute(&mut self, command: OperatorCommand<'_>) -> ConsoleReply {
        match command {
            OperatorCommand::Kick(pseudo) => {
                if self.registry.kick(pseudo) {
                    ConsoleReply::stamped(&format!("{} has been kicked", pseudo))
                } else {
                    ConsoleReply::stamped(&format!("No user '{}' found.", pseudo))
                }
            }
            OperatorCommand::List => {
                let mut reply = ConsoleReply::stamped("Connected clients:");
                for pseudo in self.registry.pseudos() {
                    reply.lines.push(format!("{} - {}", clock_stamp(), pseudo));
                }
                reply
            }
            OperatorCommand::Say(message) => {
                self.registry.broadcast(&admin_line(message));
                info!("Admin said: {}", message);
                ConsoleReply::stamped(&format!("> {}: {}", OPERATOR_NAME, message))
            }
            OperatorCommand::Whisper { dest, message } => match self.registry.lookup(dest) {
                Some(target) => {
                    target.send(whisper_line(OPERATOR_NAME, dest, message));
                    info!("Admin whispered to {}", dest);
                    ConsoleReply::stamped(&format!(
                        "[{}] whispered to {}: {}",
                        OPERATOR_NAME, dest, message
                    ))
                }
                None => ConsoleReply::stamped(&format!("No user '{}' found.", dest)),
            },
            OperatorCommand::MalformedWhisper => {
                ConsoleReply::stamped("Usage: whisper <pseudo> <message>")
            }
            OperatorCommand::StartAnimation => match self.animation.start() {
                Ok(Transition::Applied) => ConsoleReply::stamped("Animation started."),
                Ok(Transition::Ignored(state)) => {
                    ConsoleReply::stamped(&format!("Animation is already {:?}.", state))
                }
                Err(e) => {
                    warn!("Animation not started: {}", e);
                    ConsoleReply::stamped(&format!("Animation not started: {}", e))
                }
            },
            OperatorCommand::PauseAnimation => {
                transition_reply(self.animation.pause(), "Animation paused.")
            }
            OperatorCommand::ResumeAnimation => {
                transition_reply(self.animation.resume(), "Animation resumed.")
            }
            OperatorCommand::StopAnimation => {
                transition_reply(self.animation.stop().await, "Animation stopped.")
            }
            OperatorCommand::Clear => ConsoleReply::line(CLEAR_SCREEN),
            OperatorCommand::Help => ConsoleReply::stamped(CONSOLE_HELP),
            OperatorCommand::Exit => {
                self.animation.stop().await;
                let closed = self.registry.disconnect_all(SHUTDOWN_NOTICE);
                self.shutdown.cancel();
                info!("Operator requested shutdown, closed {} session(s)", closed);

                let mut reply = ConsoleReply::stamped("Server shutting down...");
                reply.exit = true;
                reply
            }
            OperatorCommand::Unknown(line) => {
                ConsoleReply::stamped(&format!("Unknown command '{}'. Type help.", line))
            }
            OperatorCommand::Empty => ConsoleReply::default(),
        }
    }
}

fn transition_reply(transition: Transition, applied: &str) -> ConsoleReply {
    match transition {
        Transition::Applied => ConsoleReply::stamped(applied),
        Transition::Ignored(state) => {
            ConsoleReply::stamped(&format!("Nothing to do, animation is {:?}.", state))
        }
    }
}
