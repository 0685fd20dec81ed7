//! Login/register negotiation for freshly accepted connections
//!
//! The exchange is strictly line based:
//!
//! ```text
//! -> Use login or register :
//! <- login | register          (repeated until valid)
//! -> Enter pseudo and password:
//! <- pseudo::password
//! -> [OK] ... | [ERROR] ...    (register, or any rejection)
//! ```
//!
//! A pending connection never touches the session registry until `admit`
//! succeeds, so a rejected handshake leaves no shared state behind.

use crate::auth::AuthStore;
use crate::error::{HandshakeError, StoreError, TransportError};
use crate::network::{read_line, write_line};
use crate::registry::{Session, SessionRegistry};
use futures::{Sink, Stream};
use log::{debug, info};
use shared::{error_line, AuthMode, Credentials, CREDENTIALS_PROMPT, MODE_PROMPT, OK_PREFIX};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::codec::LinesCodecError;

/// Result of a completed exchange
#[derive(Debug, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Account created; the connection must be closed afterwards
    Registered(String),
    /// Credentials verified; the pseudo may now be admitted
    Authenticated(String),
}

pub fn registration_reply() -> String {
    format!("{} Registration done. You can now log in.", OK_PREFIX)
}

/// Drives the exchange up to (but excluding) registry admission
pub async fn negotiate<R, W>(
    lines: &mut R,
    sink: &mut W,
    store: Arc<dyn AuthStore>,
) -> Result<HandshakeOutcome, HandshakeError>
where
    R: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    W: Sink<String, Error = LinesCodecError> + Unpin,
{
    let mode = negotiate_mode(lines, sink).await?;

    write_line(sink, CREDENTIALS_PROMPT).await?;
    let line = read_line(lines).await?;
    let credentials = Credentials::parse(&line)?;

    match mode {
        AuthMode::Register => register(store, credentials)
            .await
            .map(HandshakeOutcome::Registered),
        AuthMode::Login => login(store, credentials)
            .await
            .map(HandshakeOutcome::Authenticated),
    }
}

async fn negotiate_mode<R, W>(lines: &mut R, sink: &mut W) -> Result<AuthMode, TransportError>
where
    R: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    W: Sink<String, Error = LinesCodecError> + Unpin,
{
    loop {
        write_line(sink, MODE_PROMPT).await?;
        let token = read_line(lines).await?;

        match AuthMode::parse(&token) {
            Some(mode) => return Ok(mode),
            None => {
                debug!("Rejected handshake mode {:?}", token.trim());
                write_line(sink, &error_line("Please type 'login' or 'register'.")).await?;
            }
        }
    }
}

/// Runs a store call on the blocking pool, file-backed stores touch the disk
async fn with_store<T, F>(store: Arc<dyn AuthStore>, call: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn AuthStore) -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(store.as_ref())).await?
}

async fn register(
    store: Arc<dyn AuthStore>,
    credentials: Credentials,
) -> Result<String, HandshakeError> {
    credentials.validate()?;

    let Credentials { pseudo, password } = credentials;
    let account = pseudo.clone();
    let created = with_store(store, move |store| {
        if store.user_exists(&account)? {
            return Ok(false);
        }
        store.create_user(&account, &password).map(|()| true)
    })
    .await;

    match created {
        Ok(true) => {}
        // Lost a race with a concurrent registration of the same pseudo
        Ok(false) | Err(StoreError::AlreadyExists(_)) => return Err(HandshakeError::DuplicateUser),
        Err(e) => return Err(e.into()),
    }

    info!("Registered new account {}", pseudo);
    Ok(pseudo)
}

async fn login(
    store: Arc<dyn AuthStore>,
    credentials: Credentials,
) -> Result<String, HandshakeError> {
    credentials.validate()?;

    let Credentials { pseudo, password } = credentials;
    let account = pseudo.clone();
    let verified =
        with_store(store, move |store| store.verify_credentials(&account, &password)).await?;

    if !verified {
        return Err(HandshakeError::InvalidCredentials);
    }
    Ok(pseudo)
}

/// Creates the session and registers it, failing if the pseudo is live
pub fn admit(
    registry: &SessionRegistry,
    pseudo: &str,
) -> Result<(Arc<Session>, mpsc::Receiver<Arc<str>>), HandshakeError> {
    let (session, outbound) = registry.open_session(pseudo);
    if !registry.try_insert(Arc::clone(&session)) {
        return Err(HandshakeError::DuplicateSession);
    }
    Ok((session, outbound))
}
