//! The client session — one process's side of the shared state machine.
//!
//! The session owns the control connection (strict request/response), the
//! write half of the data connection, and the channel pair of the UI
//! contract. A reader task fans inbound data envelopes into a queue the
//! session consumes from every state; stray CLOSE frames left over from a
//! state transition are discarded wherever the protocol permits reordering
//! between a command reply and its CLOSE.

use futures::SinkExt;
use tokio::net::{tcp::OwnedWriteHalf, TcpListener, TcpStream};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, FramedParts, FramedRead, FramedWrite};
use tracing::{info, warn};

use crate::codec::{CodecError, JsonCodec};
use crate::state::SessionState;
use crate::wire::{
    pack_args, CommandEnvelope, CommandKind, DataEnvelope, DataKind, Role,
};

use super::commands;
use super::ui::{UiEvent, UiHandle, UiInput};
use super::{ClientError, Config};

/// What a dispatched command did to the session.
enum CommandOutcome {
    /// Stay in the current state handler.
    Continue,
    /// The state changed; the handler returns to the main loop.
    StateChanged,
}

/// One of the two event sources a concurrent handler waits on.
enum LoopEvent {
    Input(Option<UiInput>),
    Inbound(Option<DataEnvelope>),
}

pub struct Session {
    control: Framed<TcpStream, JsonCodec<CommandEnvelope>>,
    data_out: FramedWrite<OwnedWriteHalf, JsonCodec<DataEnvelope>>,
    inbound: mpsc::UnboundedReceiver<DataEnvelope>,
    input: mpsc::UnboundedReceiver<UiInput>,
    events: mpsc::UnboundedSender<UiEvent>,
    state: SessionState,
    username: String,
    channels: Vec<String>,
}

impl Session {
    /// Establish the connection pair: dial control, listen for the server's
    /// dial-back, exchange CONNECT. A full server answers with a DENY on the
    /// control socket instead of dialing back.
    pub async fn connect(config: &Config, ui: UiHandle) -> Result<Self, ClientError> {
        let mut control_stream = TcpStream::connect(&config.server_addr).await?;
        let listener = TcpListener::bind(&config.data_addr).await?;
        let advertised = listener.local_addr()?.to_string();

        let connect = CommandEnvelope::request(CommandKind::Connect, "", advertised);
        let mut frame = serde_json::to_vec(&connect).map_err(CodecError::Json)?;
        frame.push(b'\n');
        control_stream.write_all(&frame).await?;

        // Nothing else arrives on control before the dial-back except an
        // admission DENY, so probe it as a data envelope until then.
        let mut probe = Framed::new(control_stream, JsonCodec::<DataEnvelope>::default());
        let data_stream = tokio::select! {
            accepted = listener.accept() => accepted?.0,
            frame = probe.next() => {
                return Err(match frame {
                    Some(Ok(env)) if env.kind == DataKind::Deny => ClientError::Refused(env.data),
                    Some(Ok(env)) => ClientError::OutOfSync(format!("{:?} before dial-back", env.kind)),
                    Some(Err(e)) => e.into(),
                    None => ClientError::Disconnected,
                });
            }
        };
        // Re-frame the control socket for command traffic, keeping any
        // buffered bytes.
        let probe_parts = probe.into_parts();
        let mut parts = FramedParts::new::<CommandEnvelope>(
            probe_parts.io,
            JsonCodec::<CommandEnvelope>::default(),
        );
        parts.read_buf = probe_parts.read_buf;
        parts.write_buf = probe_parts.write_buf;
        let control = Framed::from_parts(parts);
        info!("connection pair established");

        let (data_read, data_write) = data_stream.into_split();
        let mut reader = FramedRead::new(data_read, JsonCodec::<DataEnvelope>::default());
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match reader.next().await {
                    Some(Ok(envelope)) => {
                        if inbound_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("data connection error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        });

        Ok(Self {
            control,
            data_out: FramedWrite::new(data_write, JsonCodec::default()),
            inbound,
            input: ui.input,
            events: ui.events,
            state: SessionState::ChoosingSignInOpt,
            username: String::new(),
            channels: Vec::new(),
        })
    }

    /// Drive the state machine until the session quits or a connection dies.
    pub async fn run(mut self) -> Result<(), ClientError> {
        let result = self.drive().await;
        let _ = self.events.send(UiEvent::Shutdown);
        result
    }

    async fn drive(&mut self) -> Result<(), ClientError> {
        loop {
            match self.state {
                SessionState::ChoosingSignInOpt => self.choose_sign_in().await?,
                SessionState::Registering => self.register().await?,
                SessionState::LoggingIn => self.login().await?,
                SessionState::InMainMenu => self.main_menu().await?,
                SessionState::Messaging => self.messaging().await?,
                // Help runs inline in the dispatcher and is never stored.
                SessionState::InHelpScreen | SessionState::Quitting => return Ok(()),
            }
        }
    }

    // ── Event plumbing ───────────────────────────────────────────

    fn emit(&self, event: UiEvent) {
        let _ = self.events.send(event);
    }

    async fn next_input(&mut self) -> Result<UiInput, ClientError> {
        self.input.recv().await.ok_or(ClientError::UiClosed)
    }

    async fn next_data(&mut self) -> Result<DataEnvelope, ClientError> {
        self.inbound.recv().await.ok_or(ClientError::Disconnected)
    }

    /// The next accept/deny verdict during a sign-in exchange. Stray CLOSE
    /// frames from a preceding transition are discarded.
    async fn next_verdict(&mut self) -> Result<DataEnvelope, ClientError> {
        loop {
            let envelope = self.next_data().await?;
            match envelope.kind {
                DataKind::Close => continue,
                DataKind::Accept | DataKind::Deny => return Ok(envelope),
                other => {
                    return Err(ClientError::OutOfSync(format!(
                        "{other:?} while awaiting a verdict"
                    )))
                }
            }
        }
    }

    async fn send_data(&mut self, envelope: DataEnvelope) -> Result<(), ClientError> {
        self.data_out.send(envelope).await?;
        Ok(())
    }

    /// Send one command and await its single reply on the control
    /// connection.
    async fn send_command(
        &mut self,
        kind: CommandKind,
        arguments: String,
    ) -> Result<CommandEnvelope, ClientError> {
        self.control
            .send(CommandEnvelope::request(kind, &self.username, arguments))
            .await?;
        match self.control.next().await {
            Some(reply) => Ok(reply?),
            None => Err(ClientError::Disconnected),
        }
    }

    /// Wait on both the interface and the data connection.
    async fn next_event(&mut self) -> LoopEvent {
        tokio::select! {
            input = self.input.recv() => LoopEvent::Input(input),
            envelope = self.inbound.recv() => LoopEvent::Inbound(envelope),
        }
    }

    // ── State handlers ───────────────────────────────────────────

    async fn choose_sign_in(&mut self) -> Result<(), ClientError> {
        self.emit(UiEvent::SignInMenu);
        loop {
            let line = match self.next_input().await? {
                UiInput::Esc => {
                    self.emit(UiEvent::SignInMenu);
                    continue;
                }
                UiInput::Line(line) => line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if commands::is_command(line) {
                if let CommandOutcome::StateChanged = self.handle_command(line).await? {
                    return Ok(());
                }
                continue;
            }
            match line.to_ascii_lowercase().as_str() {
                "login" | "l" => {
                    self.send_data(DataEnvelope::new(DataKind::MenuOption, "", "LOGIN"))
                        .await?;
                    self.state = SessionState::LoggingIn;
                    return Ok(());
                }
                "register" | "r" => {
                    self.send_data(DataEnvelope::new(DataKind::MenuOption, "", "REGISTER"))
                        .await?;
                    self.state = SessionState::Registering;
                    return Ok(());
                }
                "exit" | "quit" | "q" => {
                    self.exit_handshake().await?;
                    return Ok(());
                }
                _ => self.emit(UiEvent::Error("Enter login, register, or exit.".into())),
            }
        }
    }

    async fn register(&mut self) -> Result<(), ClientError> {
        let username = match self
            .credential_step(
                DataKind::Registration,
                "Choose a username (5-20 characters; starts with a letter, \
                 ends with a letter or digit; - and _ allowed):",
            )
            .await?
        {
            Some(username) => username,
            None => return Ok(()), // abandoned
        };

        let accepted = self
            .credential_step(
                DataKind::Registration,
                "Choose a password (at least 7 characters with an uppercase \
                 letter, a digit, and one of ! @ # $ % ?):",
            )
            .await?;
        if accepted.is_some() {
            self.username = username;
            self.state = SessionState::InMainMenu;
        }
        Ok(())
    }

    async fn login(&mut self) -> Result<(), ClientError> {
        let username = match self
            .credential_step(DataKind::Login, "Username:")
            .await?
        {
            Some(username) => username,
            None => return Ok(()),
        };

        let accepted = self.credential_step(DataKind::Login, "Password:").await?;
        if accepted.is_some() {
            self.username = username;
            self.state = SessionState::InMainMenu;
        }
        Ok(())
    }

    /// One prompted credential exchange: read lines until the server accepts
    /// one, routing commands along the way. Returns the accepted value, or
    /// `None` if the user abandoned the flow (ESC) or a command moved the
    /// state elsewhere.
    async fn credential_step(
        &mut self,
        kind: DataKind,
        prompt: &str,
    ) -> Result<Option<String>, ClientError> {
        self.emit(UiEvent::Prompt(prompt.into()));
        loop {
            let line = match self.next_input().await? {
                UiInput::Esc => {
                    self.send_data(DataEnvelope::new(DataKind::Esc, "", "")).await?;
                    self.state = SessionState::ChoosingSignInOpt;
                    return Ok(None);
                }
                UiInput::Line(line) => line,
            };
            let value = line.trim().to_string();
            if value.is_empty() {
                continue;
            }
            if commands::is_command(&value) {
                if let CommandOutcome::StateChanged = self.handle_command(&value).await? {
                    return Ok(None);
                }
                self.emit(UiEvent::Prompt(prompt.into()));
                continue;
            }

            self.send_data(DataEnvelope::new(kind, &value, &value)).await?;
            let verdict = self.next_verdict().await?;
            match verdict.kind {
                DataKind::Accept => {
                    self.emit(UiEvent::Info(verdict.data));
                    return Ok(Some(value));
                }
                _ => {
                    self.emit(UiEvent::Error(verdict.data));
                    self.emit(UiEvent::Prompt(prompt.into()));
                }
            }
        }
    }

    async fn main_menu(&mut self) -> Result<(), ClientError> {
        // Announce readiness, then take the channel list. Chat traffic from
        // a channel just left may still be queued ahead of it.
        self.send_data(DataEnvelope::new(
            DataKind::Refresh,
            &self.username,
            "READY",
        ))
        .await?;
        loop {
            let envelope = self.next_data().await?;
            match envelope.kind {
                DataKind::Refresh => {
                    self.set_channels(&envelope.data);
                    break;
                }
                DataKind::Close
                | DataKind::Message
                | DataKind::Join
                | DataKind::Leave => continue,
                other => {
                    return Err(ClientError::OutOfSync(format!(
                        "{other:?} while awaiting the channel list"
                    )))
                }
            }
        }
        self.emit(UiEvent::Menu(self.channels.clone()));

        loop {
            match self.next_event().await {
                LoopEvent::Input(None) => return Err(ClientError::UiClosed),
                LoopEvent::Input(Some(UiInput::Esc)) => {
                    self.emit(UiEvent::Menu(self.channels.clone()));
                }
                LoopEvent::Input(Some(UiInput::Line(line))) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if commands::is_command(&line) {
                        if let CommandOutcome::StateChanged =
                            self.handle_command(&line).await?
                        {
                            return Ok(());
                        }
                        continue;
                    }
                    match line.to_ascii_lowercase().as_str() {
                        "quit" | "exit" | "q" => {
                            self.exit_handshake().await?;
                            return Ok(());
                        }
                        _ => {}
                    }
                    let Ok(index) = line.parse::<usize>() else {
                        self.emit(UiEvent::Error(
                            "Enter a channel number, or quit.".into(),
                        ));
                        continue;
                    };
                    if self.select_channel(index).await? {
                        return Ok(());
                    }
                }
                LoopEvent::Inbound(None) => return Err(ClientError::Disconnected),
                LoopEvent::Inbound(Some(envelope)) => match envelope.kind {
                    DataKind::Refresh => {
                        self.set_channels(&envelope.data);
                        self.emit(UiEvent::Menu(self.channels.clone()));
                    }
                    // Leftovers from the channel just departed.
                    DataKind::Close
                    | DataKind::Message
                    | DataKind::Join
                    | DataKind::Leave => {}
                    other => {
                        return Err(ClientError::OutOfSync(format!(
                            "{other:?} in the main menu"
                        )))
                    }
                },
            }
        }
    }

    /// Send a channel selection and await the join announcement (which is
    /// the confirmation) or a denial. Returns `true` once messaging.
    async fn select_channel(&mut self, index: usize) -> Result<bool, ClientError> {
        self.send_data(DataEnvelope::new(
            DataKind::MenuOption,
            &self.username,
            index.to_string(),
        ))
        .await?;
        loop {
            let envelope = self.next_data().await?;
            match envelope.kind {
                DataKind::Join => {
                    self.state = SessionState::Messaging;
                    self.emit(UiEvent::Notice(envelope.data));
                    return Ok(true);
                }
                DataKind::Deny => {
                    self.emit(UiEvent::Error(envelope.data));
                    self.emit(UiEvent::Menu(self.channels.clone()));
                    return Ok(false);
                }
                DataKind::Refresh => self.set_channels(&envelope.data),
                DataKind::Close => {}
                other => {
                    return Err(ClientError::OutOfSync(format!(
                        "{other:?} while joining a channel"
                    )))
                }
            }
        }
    }

    async fn messaging(&mut self) -> Result<(), ClientError> {
        loop {
            match self.next_event().await {
                LoopEvent::Input(None) => return Err(ClientError::UiClosed),
                LoopEvent::Input(Some(UiInput::Esc)) => {
                    if let CommandOutcome::StateChanged = self.main_command().await? {
                        return Ok(());
                    }
                }
                LoopEvent::Input(Some(UiInput::Line(line))) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if commands::is_command(&line) {
                        if let CommandOutcome::StateChanged =
                            self.handle_command(&line).await?
                        {
                            return Ok(());
                        }
                        continue;
                    }
                    self.send_data(DataEnvelope::new(
                        DataKind::Message,
                        &self.username,
                        &line,
                    ))
                    .await?;
                    self.emit(UiEvent::Chat {
                        from: "You".into(),
                        text: line,
                    });
                }
                LoopEvent::Inbound(None) => return Err(ClientError::Disconnected),
                LoopEvent::Inbound(Some(envelope)) => match envelope.kind {
                    DataKind::Message => self.emit(UiEvent::Chat {
                        from: envelope.username,
                        text: envelope.data,
                    }),
                    DataKind::Join | DataKind::Leave => {
                        self.emit(UiEvent::Notice(envelope.data))
                    }
                    DataKind::Refresh => self.set_channels(&envelope.data),
                    DataKind::Close => {
                        if self.state == SessionState::Messaging {
                            self.state = SessionState::InMainMenu;
                        }
                        return Ok(());
                    }
                    other => {
                        return Err(ClientError::OutOfSync(format!(
                            "{other:?} while messaging"
                        )))
                    }
                },
            }
        }
    }

    // ── Command dispatch ─────────────────────────────────────────

    async fn handle_command(&mut self, line: &str) -> Result<CommandOutcome, ClientError> {
        let (kind, args) = commands::parse(line);
        match kind {
            CommandKind::Help => self.help_command().await,
            CommandKind::Exit => {
                self.exit_handshake().await?;
                Ok(CommandOutcome::StateChanged)
            }
            CommandKind::Main => self.main_command().await,
            _ => {
                let packed: Vec<&str> = args.iter().map(String::as_str).collect();
                let reply = self.send_command(kind, pack_args(&packed)).await?;
                if reply.successful {
                    match kind {
                        CommandKind::Create | CommandKind::ChangeTopic => {
                            // The success payload is the updated channel list.
                            self.set_channels(&reply.arguments);
                            self.emit(UiEvent::Info(format!(
                                "Channels are now: {}",
                                reply.arguments
                            )));
                        }
                        _ => self.emit(UiEvent::Info(reply.arguments)),
                    }
                } else {
                    self.emit(UiEvent::Error(reply.arguments));
                }
                Ok(CommandOutcome::Continue)
            }
        }
    }

    /// `/help`: show the screen for the role the server reports, then tell
    /// the server the screen was dismissed so it restores the saved state.
    async fn help_command(&mut self) -> Result<CommandOutcome, ClientError> {
        let reply = self.send_command(CommandKind::Help, String::new()).await?;
        let role = reply
            .arguments
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(|digit| Role::try_from(digit).ok())
            .unwrap_or_default();
        self.emit(UiEvent::Help(role));
        let _ = self.next_input().await?;
        self.control
            .send(CommandEnvelope::request(
                CommandKind::Help,
                &self.username,
                "DONE",
            ))
            .await?;
        Ok(CommandOutcome::Continue)
    }

    /// `/main`: back to the main menu. On success the server has already
    /// left the channel; the CLOSE we send unwedges its data task.
    async fn main_command(&mut self) -> Result<CommandOutcome, ClientError> {
        let reply = self.send_command(CommandKind::Main, String::new()).await?;
        if reply.successful {
            self.state = SessionState::InMainMenu;
            self.send_data(DataEnvelope::close()).await?;
            Ok(CommandOutcome::StateChanged)
        } else {
            self.emit(UiEvent::Error(reply.arguments));
            Ok(CommandOutcome::Continue)
        }
    }

    /// `/exit`: the four-step orderly shutdown handshake.
    async fn exit_handshake(&mut self) -> Result<(), ClientError> {
        let reply = self.send_command(CommandKind::Exit, String::new()).await?;
        if reply.arguments != "READY" {
            return Err(ClientError::OutOfSync(format!(
                "exit handshake expected READY, got {:?}",
                reply.arguments
            )));
        }
        self.send_data(DataEnvelope::close()).await?;
        let reply = self
            .send_command(CommandKind::Exit, "CLOSE_SENT".into())
            .await?;
        if reply.arguments != "CLOSING" {
            return Err(ClientError::OutOfSync(format!(
                "exit handshake expected CLOSING, got {:?}",
                reply.arguments
            )));
        }
        self.state = SessionState::Quitting;
        info!("exit handshake complete");
        Ok(())
    }

    fn set_channels(&mut self, list: &str) {
        self.channels = list.split_whitespace().map(str::to_owned).collect();
    }
}
