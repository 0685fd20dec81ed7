use futures::{SinkExt, StreamExt};
use log::{debug, info};
use shared::{is_terminal_handshake_reply, CREDENTIALS_PROMPT, MODE_PROMPT, OK_PREFIX};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unable to connect to server {addr}: {source}")]
    ConnectFailure {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connection error: {0}")]
    Transport(#[from] LinesCodecError),
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),
}

/// How a client run came to an end
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The account was created; the server closes the connection afterwards
    Registered,
    /// The server refused the handshake with this line
    Rejected(String),
    /// The user typed `exit` or closed the terminal input
    Exited,
    /// The server closed the connection (kick, shutdown, lost link)
    ServerClosed,
}

pub struct Client<R, W> {
    lines: FramedRead<R, LinesCodec>,
    sink: FramedWrite<W, LinesCodec>,
}

impl Client<OwnedReadHalf, OwnedWriteHalf> {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::ConnectFailure {
                addr: addr.to_string(),
                source,
            })?;
        info!("Connected to {}", addr);

        let (read_half, write_half) = stream.into_split();
        Ok(Client::new(read_half, write_half))
    }
}

impl<R, W> Client<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new()),
            sink: FramedWrite::new(writer, LinesCodec::new()),
        }
    }

    /// Relays the handshake, then the chat, between the terminal and the server
    pub async fn run<I, O>(mut self, input: I, mut output: O) -> Result<SessionEnd, ClientError>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let mut input = input.lines();

        // Answer prompts until the credentials are on their way
        loop {
            let Some(line) = self.lines.next().await else {
                emit(&mut output, "You are now disconnected.").await?;
                return Ok(SessionEnd::ServerClosed);
            };
            let line = line?;
            emit(&mut output, &line).await?;

            if line != MODE_PROMPT && line != CREDENTIALS_PROMPT {
                continue;
            }
            let Some(answer) = input.next_line().await? else {
                return Ok(SessionEnd::Exited);
            };

            if line == MODE_PROMPT {
                self.sink.send(answer.trim().to_lowercase()).await?;
            } else {
                self.sink.send(answer).await?;
                break;
            }
        }

        // A login success is silent, so the first line back decides whether
        // the handshake failed
        let mut awaiting_verdict = true;

        loop {
            tokio::select! {
                biased;
                line = self.lines.next() => match line {
                    Some(line) => {
                        let line = line?;
                        emit(&mut output, &line).await?;

                        if awaiting_verdict {
                            if line.starts_with(OK_PREFIX) {
                                return Ok(SessionEnd::Registered);
                            }
                            if is_terminal_handshake_reply(&line) {
                                return Ok(SessionEnd::Rejected(line));
                            }
                            awaiting_verdict = false;
                        }
                    }
                    None => {
                        emit(&mut output, "You are now disconnected.").await?;
                        return Ok(SessionEnd::ServerClosed);
                    }
                },
                typed = input.next_line() => {
                    let Some(text) = typed? else {
                        debug!("Terminal input closed");
                        self.hang_up().await;
                        return Ok(SessionEnd::Exited);
                    };
                    if text.trim().is_empty() {
                        continue;
                    }

                    awaiting_verdict = false;
                    let exit = text.trim().eq_ignore_ascii_case("exit");
                    self.sink.send(text).await?;

                    if exit {
                        self.hang_up().await;
                        emit(&mut output, "You are now disconnected.").await?;
                        return Ok(SessionEnd::Exited);
                    }
                }
            }
        }
    }

    async fn hang_up(&mut self) {
        let _ = self.sink.get_mut().shutdown().await;
    }
}

async fn emit<O>(output: &mut O, line: &str) -> std::io::Result<()>
where
    O: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
