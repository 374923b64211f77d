//! Per-client data task — the server side of the shared state machine.
//!
//! The task loops over the slot's state and runs one handler per state; a
//! handler returns when the exchange completes or when a CLOSE envelope
//! arrives (a command changed the state mid-read and the client unwedged
//! us), and the loop resynchronizes on the new value.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::codec::CodecError;
use crate::state::SessionState;
use crate::wire::{DataEnvelope, DataKind, Role};

use super::{DataReader, Server};

/// Terminal conditions of a client's worker tasks.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// EOF on either socket; clean disconnect.
    #[error("client closed the connection")]
    Disconnected,
    /// Frame that does not fit the state machine's expectation.
    #[error("out of sync: expected {expected}, got {got}")]
    OutOfSync { expected: &'static str, got: String },
    /// Well-formed frame carrying data the protocol does not allow here.
    #[error("unexpected data in frame: {0}")]
    UnexpectedData(String),
    /// No free roster slot despite passing the admission gate.
    #[error("no free roster slot")]
    RosterFull,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Run the state machine until the client quits or the connection dies.
pub(crate) async fn data_task(
    server: Arc<Server>,
    slot: usize,
    mut reader: DataReader,
    data_tx: mpsc::UnboundedSender<DataEnvelope>,
) -> Result<(), WorkerError> {
    loop {
        let state = server.roster.lock().await.state(slot);
        match state {
            SessionState::ChoosingSignInOpt => {
                choose_sign_in(&server, slot, &mut reader).await?
            }
            SessionState::Registering => register(&server, slot, &mut reader, &data_tx).await?,
            SessionState::LoggingIn => login(&server, slot, &mut reader, &data_tx).await?,
            SessionState::InMainMenu => main_menu(&server, slot, &mut reader, &data_tx).await?,
            SessionState::Messaging => messaging(&server, slot, &mut reader).await?,
            SessionState::InHelpScreen => park_in_help(&server, slot).await,
            SessionState::Quitting => {
                info!(slot, "closing data task");
                return Ok(());
            }
        }
    }
}

/// Read the next data envelope; EOF is the Disconnected terminal condition.
async fn next_envelope(reader: &mut DataReader) -> Result<DataEnvelope, WorkerError> {
    match reader.next().await {
        Some(frame) => Ok(frame?),
        None => Err(WorkerError::Disconnected),
    }
}

fn send(data_tx: &mpsc::UnboundedSender<DataEnvelope>, envelope: DataEnvelope) {
    // A closed writer means teardown is already underway.
    let _ = data_tx.send(envelope);
}

/// ChoosingSignInOpt: one MENU_OPTION frame selects the sign-in flow.
async fn choose_sign_in(
    server: &Server,
    slot: usize,
    reader: &mut DataReader,
) -> Result<(), WorkerError> {
    let envelope = next_envelope(reader).await?;
    match envelope.kind {
        DataKind::Close => Ok(()),
        DataKind::MenuOption => {
            let next = match envelope.data.to_ascii_uppercase().as_str() {
                "LOGIN" => SessionState::LoggingIn,
                "REGISTER" => SessionState::Registering,
                other => return Err(WorkerError::UnexpectedData(other.into())),
            };
            server.roster.lock().await.set_state(slot, next);
            Ok(())
        }
        other => Err(WorkerError::OutOfSync {
            expected: "MENU_OPTION",
            got: format!("{other:?}"),
        }),
    }
}

/// Registering: a two-step transaction. The username is reserved in the
/// roster slot after step one (so nobody else can claim it mid-flow) but the
/// account reaches the registry only after the password is accepted. ESC at
/// either step rolls the reservation back.
async fn register(
    server: &Server,
    slot: usize,
    reader: &mut DataReader,
    data_tx: &mpsc::UnboundedSender<DataEnvelope>,
) -> Result<(), WorkerError> {
    // Step one: username.
    let username = loop {
        let envelope = next_envelope(reader).await?;
        match envelope.kind {
            DataKind::Close => return Ok(()),
            DataKind::Esc => return abandon_sign_in(server, slot).await,
            DataKind::Registration => {
                let candidate = envelope.data;
                let verdict = {
                    let registry = server.registry.lock().await;
                    let roster = server.roster.lock().await;
                    registry.validate_username(&candidate, roster.username_held(&candidate))
                };
                match verdict {
                    Ok(()) => {
                        if let Some(client) = server.roster.lock().await.get_mut(slot) {
                            client.username = candidate.clone();
                        }
                        send(
                            data_tx,
                            DataEnvelope::new(
                                DataKind::Accept,
                                &candidate,
                                format!(
                                    "You have been registered with the username \"{candidate}\""
                                ),
                            ),
                        );
                        break candidate;
                    }
                    Err(e) => {
                        send(data_tx, DataEnvelope::new(DataKind::Deny, "", e.to_string()));
                    }
                }
            }
            other => {
                return Err(WorkerError::OutOfSync {
                    expected: "REGISTRATION",
                    got: format!("{other:?}"),
                })
            }
        }
    };

    // Step two: password. Commit happens here.
    loop {
        let envelope = next_envelope(reader).await?;
        match envelope.kind {
            DataKind::Close => return Ok(()),
            DataKind::Esc => return abandon_sign_in(server, slot).await,
            DataKind::Registration => {
                let password = envelope.data;
                match super::registry::Registry::validate_password(&password) {
                    Ok(()) => {
                        server
                            .registry
                            .lock()
                            .await
                            .register(&username, &password)?;
                        {
                            let mut roster = server.roster.lock().await;
                            if let Some(client) = roster.get_mut(slot) {
                                client.logged_in = true;
                                client.role = Role::Public;
                            }
                            roster.set_state(slot, SessionState::InMainMenu);
                        }
                        send(
                            data_tx,
                            DataEnvelope::new(
                                DataKind::Accept,
                                &username,
                                "account successfully created",
                            ),
                        );
                        return Ok(());
                    }
                    Err(e) => {
                        send(data_tx, DataEnvelope::new(DataKind::Deny, "", e.to_string()));
                    }
                }
            }
            other => {
                return Err(WorkerError::OutOfSync {
                    expected: "REGISTRATION",
                    got: format!("{other:?}"),
                })
            }
        }
    }
}

/// LoggingIn: find the account, then check the password. The username is
/// reserved in the slot between the steps, which is what makes a duplicate
/// login visible to every other sign-in attempt.
async fn login(
    server: &Server,
    slot: usize,
    reader: &mut DataReader,
    data_tx: &mpsc::UnboundedSender<DataEnvelope>,
) -> Result<(), WorkerError> {
    // Step one: username.
    let username = loop {
        let envelope = next_envelope(reader).await?;
        match envelope.kind {
            DataKind::Close => return Ok(()),
            DataKind::Esc => return abandon_sign_in(server, slot).await,
            DataKind::Login => {
                let candidate = envelope.data;
                let refusal = {
                    let registry = server.registry.lock().await;
                    let roster = server.roster.lock().await;
                    match registry.lookup(&candidate) {
                        None => Some("No account found with that username"),
                        Some(i) if registry.get(i).banned => {
                            Some("This account is banned from the server")
                        }
                        Some(_) if roster.username_held(&candidate) => {
                            Some("This account is already logged in somewhere")
                        }
                        Some(_) => None,
                    }
                };
                match refusal {
                    Some(reason) => {
                        send(data_tx, DataEnvelope::new(DataKind::Deny, "", reason));
                    }
                    None => {
                        if let Some(client) = server.roster.lock().await.get_mut(slot) {
                            client.username = candidate.clone();
                        }
                        send(
                            data_tx,
                            DataEnvelope::new(
                                DataKind::Accept,
                                &candidate,
                                "Found account with that username",
                            ),
                        );
                        break candidate;
                    }
                }
            }
            other => {
                return Err(WorkerError::OutOfSync {
                    expected: "LOGIN",
                    got: format!("{other:?}"),
                })
            }
        }
    };

    // Step two: password.
    loop {
        let envelope = next_envelope(reader).await?;
        match envelope.kind {
            DataKind::Close => return Ok(()),
            DataKind::Esc => return abandon_sign_in(server, slot).await,
            DataKind::Login => {
                let (verified, role) = {
                    let registry = server.registry.lock().await;
                    let verified = registry.verify(&username, &envelope.data);
                    let role = registry
                        .lookup(&username)
                        .map(|i| registry.get(i).role)
                        .unwrap_or_default();
                    (verified, role)
                };
                if verified {
                    {
                        let mut roster = server.roster.lock().await;
                        if let Some(client) = roster.get_mut(slot) {
                            client.logged_in = true;
                            client.role = role;
                        }
                        roster.set_state(slot, SessionState::InMainMenu);
                    }
                    send(
                        data_tx,
                        DataEnvelope::new(DataKind::Accept, &username, "Success!"),
                    );
                    info!(slot, %username, "logged in");
                    return Ok(());
                }
                send(
                    data_tx,
                    DataEnvelope::new(DataKind::Deny, "", "Incorrect password"),
                );
            }
            other => {
                return Err(WorkerError::OutOfSync {
                    expected: "LOGIN",
                    got: format!("{other:?}"),
                })
            }
        }
    }
}

/// Roll a sign-in flow back to the sign-in menu, releasing any name the
/// slot had reserved.
async fn abandon_sign_in(server: &Server, slot: usize) -> Result<(), WorkerError> {
    let mut roster = server.roster.lock().await;
    if let Some(client) = roster.get_mut(slot) {
        client.username.clear();
    }
    roster.set_state(slot, SessionState::ChoosingSignInOpt);
    Ok(())
}

/// InMainMenu: serve the channel list, then a selection.
async fn main_menu(
    server: &Server,
    slot: usize,
    reader: &mut DataReader,
    data_tx: &mpsc::UnboundedSender<DataEnvelope>,
) -> Result<(), WorkerError> {
    // The client announces readiness before the list goes out.
    let envelope = next_envelope(reader).await?;
    match envelope.kind {
        DataKind::Close => return Ok(()),
        DataKind::Refresh if envelope.data == "READY" => {}
        DataKind::Refresh => return Err(WorkerError::UnexpectedData(envelope.data)),
        other => {
            return Err(WorkerError::OutOfSync {
                expected: "REFRESH",
                got: format!("{other:?}"),
            })
        }
    }

    let (username, list) = {
        let roster = server.roster.lock().await;
        let channels = server.channels.lock().await;
        let username = roster.get(slot).map(|c| c.username.clone()).unwrap_or_default();
        (username, channels.list_line())
    };
    send(data_tx, DataEnvelope::new(DataKind::Refresh, &username, list));

    // Then a channel selection.
    loop {
        let envelope = next_envelope(reader).await?;
        match envelope.kind {
            DataKind::Close => return Ok(()),
            DataKind::MenuOption => {
                let choice = match envelope.data.trim().parse::<usize>() {
                    Ok(n) => n,
                    Err(_) => {
                        send(
                            data_tx,
                            DataEnvelope::new(DataKind::Deny, "", "Invalid channel selection"),
                        );
                        continue;
                    }
                };

                {
                    let mut roster = server.roster.lock().await;
                    let mut channels = server.channels.lock().await;
                    if !channels.is_live(choice) {
                        drop(channels);
                        drop(roster);
                        send(
                            data_tx,
                            DataEnvelope::new(DataKind::Deny, "", "Invalid channel selection"),
                        );
                        continue;
                    }
                    channels.join(choice, slot);
                    if let Some(client) = roster.get_mut(slot) {
                        client.current_channel = Some(choice);
                    }
                    roster.set_state(slot, SessionState::Messaging);
                }

                let username = server
                    .roster
                    .lock()
                    .await
                    .get(slot)
                    .map(|c| c.username.clone())
                    .unwrap_or_default();
                // The joiner is a member by now, so the announcement doubles
                // as their confirmation.
                server
                    .fan_out(
                        choice,
                        None,
                        DataEnvelope::new(
                            DataKind::Join,
                            &username,
                            format!("{username} has joined the channel"),
                        ),
                    )
                    .await;
                info!(slot, %username, channel = choice, "joined channel");
                return Ok(());
            }
            other => {
                return Err(WorkerError::OutOfSync {
                    expected: "MENU_OPTION",
                    got: format!("{other:?}"),
                })
            }
        }
    }
}

/// Messaging: relay chat to the rest of the channel until a CLOSE arrives.
async fn messaging(
    server: &Server,
    slot: usize,
    reader: &mut DataReader,
) -> Result<(), WorkerError> {
    loop {
        let envelope = next_envelope(reader).await?;
        match envelope.kind {
            DataKind::Close => return Ok(()),
            DataKind::Esc => {
                // Leaving from the data side: same effect as /main.
                server
                    .leave_channel(slot, Some(SessionState::InMainMenu))
                    .await;
                return Ok(());
            }
            DataKind::Message => {
                let (channel, username) = {
                    let roster = server.roster.lock().await;
                    match roster.get(slot) {
                        Some(client) => (client.current_channel, client.username.clone()),
                        None => return Ok(()),
                    }
                };
                let Some(channel) = channel else {
                    warn!(slot, "message from a client outside any channel");
                    continue;
                };
                // The server stamps the sender; the client's claim is ignored.
                server
                    .fan_out(
                        channel,
                        Some(slot),
                        DataEnvelope::new(DataKind::Message, &username, envelope.data),
                    )
                    .await;
            }
            other => {
                return Err(WorkerError::OutOfSync {
                    expected: "MESSAGE",
                    got: format!("{other:?}"),
                })
            }
        }
    }
}

/// InHelpScreen: park until the control task restores the saved state.
async fn park_in_help(server: &Server, slot: usize) {
    let notify = match server.roster.lock().await.get(slot) {
        Some(client) => Arc::clone(&client.state_changed),
        None => return,
    };
    let notified = notify.notified();
    tokio::pin!(notified);
    notified.as_mut().enable();
    // Re-check after registering so a restore between the state read and
    // here cannot be missed.
    if server.roster.lock().await.state(slot) == SessionState::InHelpScreen {
        notified.await;
    }
}
