//! Server core — shared state, accept loop, connection-pair setup.
//!
//! Each admitted client owns one roster slot and is served by two
//! cooperating tasks: a data-side state machine and a control-side command
//! dispatcher (see [`worker`] and [`commands`]). The registry, roster,
//! channel table, and admission counter are each behind their own lock;
//! handlers that touch more than one acquire in the order registry → roster
//! → channels, and nothing does socket I/O while holding any of them.

pub mod channels;
pub mod commands;
pub mod registry;
pub mod roster;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, FramedRead, FramedWrite};
use tracing::{info, warn};

use crate::codec::JsonCodec;
use crate::state::SessionState;
use crate::wire::{CommandEnvelope, CommandKind, DataEnvelope, DataKind};

use channels::ChannelTable;
use registry::Registry;
use roster::Roster;
use worker::WorkerError;

/// Server configuration. The defaults are the deployment contract; tests
/// override fields directly.
#[derive(Debug, Clone)]
pub struct Config {
    /// Control-connection listen address.
    pub listen_addr: String,
    /// Directory holding one JSON file per registered account.
    pub users_dir: PathBuf,
    /// Roster capacity.
    pub max_clients: usize,
    /// Channel table capacity, including the default channel.
    pub max_channels: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "localhost:7777".into(),
            users_dir: "./users".into(),
            max_clients: 20,
            max_channels: 10,
        }
    }
}

/// Shared server state: the guarded tables plus the admission counter.
#[derive(Debug)]
pub struct Server {
    config: Config,
    pub(crate) registry: Mutex<Registry>,
    pub(crate) roster: Mutex<Roster>,
    pub(crate) channels: Mutex<ChannelTable>,
    active: Mutex<usize>,
}

impl Server {
    fn new(config: Config) -> std::io::Result<Self> {
        let registry = Registry::load(&config.users_dir)?;
        Ok(Self {
            roster: Mutex::new(Roster::new(config.max_clients)),
            channels: Mutex::new(ChannelTable::new(config.max_channels)),
            registry: Mutex::new(registry),
            active: Mutex::new(0),
            config,
        })
    }

    /// Fan a data envelope out to a channel's members in insertion order,
    /// skipping members not currently messaging.
    pub(crate) async fn fan_out(
        &self,
        channel: usize,
        exclude: Option<usize>,
        envelope: DataEnvelope,
    ) {
        let roster = self.roster.lock().await;
        let channels = self.channels.lock().await;
        for member in channels.members(channel) {
            if Some(member) == exclude {
                continue;
            }
            if let Some(client) = roster.get(member) {
                if client.state == SessionState::Messaging {
                    let _ = client.data_tx.send(envelope.clone());
                }
            }
        }
    }

    /// Push the current channel list to every client sitting in the main
    /// menu, except the one that caused the change (it gets the list in its
    /// command reply).
    pub(crate) async fn refresh_main_menus(&self, exclude: usize) {
        let roster = self.roster.lock().await;
        let channels = self.channels.lock().await;
        let line = channels.list_line();
        for (slot, client) in roster.iter() {
            if slot != exclude && client.state == SessionState::InMainMenu {
                let _ = client
                    .data_tx
                    .send(DataEnvelope::new(DataKind::Refresh, "", line.clone()));
            }
        }
    }

    /// Remove a client from its current channel: membership and state
    /// commit first, then the LEAVE_MSG fan-out to the rest. Returns false
    /// when the client was not in a channel.
    pub(crate) async fn leave_channel(
        &self,
        slot: usize,
        next_state: Option<SessionState>,
    ) -> bool {
        let (channel, username) = {
            let roster = self.roster.lock().await;
            match roster.get(slot) {
                Some(client) => (client.current_channel, client.username.clone()),
                None => (None, String::new()),
            }
        };
        let Some(channel) = channel else {
            return false;
        };

        {
            let mut roster = self.roster.lock().await;
            let mut channels = self.channels.lock().await;
            channels.leave(channel, slot);
            if let Some(client) = roster.get_mut(slot) {
                client.current_channel = None;
            }
            if let Some(state) = next_state {
                roster.set_state(slot, state);
            }
        }

        self.fan_out(
            channel,
            Some(slot),
            DataEnvelope::new(
                DataKind::Leave,
                &username,
                format!("{username} has left the channel"),
            ),
        )
        .await;
        true
    }

    /// Release a client's slot: leave its channel with a LEAVE_MSG fan-out,
    /// free the slot, decrement the admission counter. Runs exactly once per
    /// client, from the task that owns the slot.
    async fn teardown(&self, slot: usize) {
        self.leave_channel(slot, None).await;
        self.roster.lock().await.release(slot);
        *self.active.lock().await -= 1;
        info!(slot, "released client slot");
    }
}

/// Bind the configured listener and serve until SIGINT.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("rookery listening on {}", config.listen_addr);
    serve(listener, config).await
}

/// Serve an already-bound listener until SIGINT. On SIGINT the registry is
/// persisted and the acceptor stops; workers die with the process.
pub async fn serve(
    listener: TcpListener,
    config: Config,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let server = Arc::new(Server::new(config)?);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (control, addr) = accepted?;
                info!(%addr, "new connection");

                // Admission gate: a full server sends one DENY on the control
                // socket and closes it without dialing back.
                {
                    let mut active = server.active.lock().await;
                    if *active >= server.config.max_clients {
                        warn!(%addr, "server full, refusing client");
                        tokio::spawn(deny_admission(control));
                        continue;
                    }
                    *active += 1;
                }

                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    if let Err(e) = admit(server, control).await {
                        warn!(%addr, "client error: {e}");
                    }
                    info!(%addr, "disconnected");
                });
            }

            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, persisting accounts");
                server.registry.lock().await.save()?;
                return Ok(());
            }
        }
    }
}

/// Send the server-full DENY and let the socket drop.
async fn deny_admission(control: TcpStream) {
    let mut framed = Framed::new(control, JsonCodec::<DataEnvelope>::default());
    let _ = framed
        .send(DataEnvelope::new(
            DataKind::Deny,
            "",
            "Server is full. Try again later",
        ))
        .await;
}

/// Establish the connection pair for an admitted client, then serve it.
/// The admission counter was already incremented; every exit path below
/// ends in exactly one decrement (directly here, or via `teardown`).
async fn admit(server: Arc<Server>, control: TcpStream) -> Result<(), WorkerError> {
    let (slot, control_framed, data_read, data_tx) =
        match establish(&server, control).await {
            Ok(parts) => parts,
            Err(e) => {
                *server.active.lock().await -= 1;
                return Err(e);
            }
        };

    serve_client(server, slot, control_framed, data_read, data_tx).await;
    Ok(())
}

pub(crate) type ControlFramed = Framed<TcpStream, JsonCodec<CommandEnvelope>>;
pub(crate) type DataReader =
    FramedRead<tokio::net::tcp::OwnedReadHalf, JsonCodec<DataEnvelope>>;

/// Read the CONNECT frame, dial the client's data listener, allocate a slot,
/// and spawn the data-writer task.
async fn establish(
    server: &Arc<Server>,
    control: TcpStream,
) -> Result<
    (
        usize,
        ControlFramed,
        DataReader,
        mpsc::UnboundedSender<DataEnvelope>,
    ),
    WorkerError,
> {
    let mut control = Framed::new(control, JsonCodec::<CommandEnvelope>::default());

    let first = control.next().await.ok_or(WorkerError::Disconnected)??;
    if first.kind != CommandKind::Connect {
        return Err(WorkerError::OutOfSync {
            expected: "CONNECT",
            got: format!("{:?}", first.kind),
        });
    }

    let data = TcpStream::connect(&first.arguments).await?;
    info!(addr = %first.arguments, "established data connection");

    let (data_read, data_write) = data.into_split();
    let data_read = FramedRead::new(data_read, JsonCodec::<DataEnvelope>::default());
    let mut data_write = FramedWrite::new(data_write, JsonCodec::<DataEnvelope>::default());

    let (data_tx, mut data_rx) = mpsc::unbounded_channel::<DataEnvelope>();
    tokio::spawn(async move {
        while let Some(envelope) = data_rx.recv().await {
            if data_write.send(envelope).await.is_err() {
                break;
            }
        }
    });

    let slot = server
        .roster
        .lock()
        .await
        .allocate(data_tx.clone())
        .ok_or(WorkerError::RosterFull)?;

    Ok((slot, control, data_read, data_tx))
}

/// Run a client's two tasks and tear the slot down exactly once when either
/// finishes.
async fn serve_client(
    server: Arc<Server>,
    slot: usize,
    control_framed: ControlFramed,
    data_read: DataReader,
    data_tx: mpsc::UnboundedSender<DataEnvelope>,
) {
    let mut control_task = tokio::spawn(commands::control_task(
        Arc::clone(&server),
        slot,
        control_framed,
    ));
    let mut data_task = tokio::spawn(worker::data_task(
        Arc::clone(&server),
        slot,
        data_read,
        data_tx,
    ));

    tokio::select! {
        result = &mut control_task => {
            if let Ok(Err(e)) = result {
                warn!(slot, "control task error: {e}");
            }
            data_task.abort();
            let _ = data_task.await;
        }
        result = &mut data_task => {
            if let Ok(Err(e)) = result {
                warn!(slot, "data task error: {e}");
            }
            // An orderly exit ends the data task on the client's CLOSE while
            // the control task still owes the final CLOSING reply.
            if server.roster.lock().await.state(slot) == SessionState::Quitting {
                let _ = control_task.await;
            } else {
                control_task.abort();
                let _ = control_task.await;
            }
        }
    }

    server.teardown(slot).await;
}
