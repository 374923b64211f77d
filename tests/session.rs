//! End-to-end protocol tests against an in-process server.
//!
//! Each test binds a server to an ephemeral port and drives it with scripted
//! clients speaking the real wire format over real sockets: the dual
//! CONNECT handshake, the sign-in flows, channel traffic, the command
//! request/response rule, and the four-step exit handshake.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use rookery::client::{self, Session, UiEvent, UiHandle, UiInput};
use rookery::codec::JsonCodec;
use rookery::server::{self, Config};
use rookery::wire::{CommandEnvelope, CommandKind, DataEnvelope, DataKind};

const TICK: Duration = Duration::from_secs(5);

async fn spawn_server(
    users_dir: &Path,
    max_clients: usize,
    max_channels: usize,
) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Config {
        listen_addr: addr.to_string(),
        users_dir: users_dir.to_path_buf(),
        max_clients,
        max_channels,
    };
    let handle = tokio::spawn(async move {
        let _ = server::serve(listener, config).await;
    });
    (addr, handle)
}

/// A scripted client speaking the wire protocol directly.
struct TestClient {
    control: Framed<TcpStream, JsonCodec<CommandEnvelope>>,
    data: Framed<TcpStream, JsonCodec<DataEnvelope>>,
}

impl TestClient {
    /// Dial control, listen for the dial-back, exchange CONNECT.
    async fn connect(addr: SocketAddr) -> Self {
        let mut control_stream = TcpStream::connect(addr).await.unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let data_addr = listener.local_addr().unwrap();

        let connect =
            CommandEnvelope::request(CommandKind::Connect, "", data_addr.to_string());
        let mut frame = serde_json::to_vec(&connect).unwrap();
        frame.push(b'\n');
        control_stream.write_all(&frame).await.unwrap();

        let (data_stream, _) = timeout(TICK, listener.accept())
            .await
            .expect("server never dialed back")
            .unwrap();

        Self {
            control: Framed::new(control_stream, JsonCodec::default()),
            data: Framed::new(data_stream, JsonCodec::default()),
        }
    }

    async fn send_data(&mut self, kind: DataKind, username: &str, data: &str) {
        self.data
            .send(DataEnvelope::new(kind, username, data))
            .await
            .unwrap();
    }

    async fn recv_data(&mut self) -> DataEnvelope {
        timeout(TICK, self.data.next())
            .await
            .expect("timed out waiting for a data envelope")
            .expect("data connection closed")
            .expect("bad data frame")
    }

    /// One command and its single reply.
    async fn command(
        &mut self,
        kind: CommandKind,
        username: &str,
        arguments: &str,
    ) -> CommandEnvelope {
        self.control
            .send(CommandEnvelope::request(kind, username, arguments))
            .await
            .unwrap();
        timeout(TICK, self.control.next())
            .await
            .expect("timed out waiting for a command reply")
            .expect("control connection closed")
            .expect("bad command frame")
    }

    async fn register(&mut self, username: &str, password: &str) {
        self.send_data(DataKind::MenuOption, "", "REGISTER").await;
        self.send_data(DataKind::Registration, username, username).await;
        let verdict = self.recv_data().await;
        assert_eq!(verdict.kind, DataKind::Accept, "{}", verdict.data);
        self.send_data(DataKind::Registration, username, password).await;
        let verdict = self.recv_data().await;
        assert_eq!(verdict.kind, DataKind::Accept, "{}", verdict.data);
    }

    async fn login(&mut self, username: &str, password: &str) {
        self.send_data(DataKind::MenuOption, "", "LOGIN").await;
        self.send_data(DataKind::Login, username, username).await;
        let verdict = self.recv_data().await;
        assert_eq!(verdict.kind, DataKind::Accept, "{}", verdict.data);
        self.send_data(DataKind::Login, username, password).await;
        let verdict = self.recv_data().await;
        assert_eq!(verdict.kind, DataKind::Accept, "{}", verdict.data);
    }

    /// Announce readiness for the main menu and take the channel list. The
    /// list must be the next frame; anything else is a test failure.
    async fn enter_menu(&mut self) -> Vec<String> {
        self.send_data(DataKind::Refresh, "", "READY").await;
        let envelope = self.recv_data().await;
        assert_eq!(envelope.kind, DataKind::Refresh, "{}", envelope.data);
        envelope.data.split_whitespace().map(str::to_owned).collect()
    }

    /// Select a channel and return the join announcement.
    async fn join_channel(&mut self, index: usize) -> DataEnvelope {
        self.send_data(DataKind::MenuOption, "", &index.to_string()).await;
        let envelope = self.recv_data().await;
        assert_eq!(envelope.kind, DataKind::Join, "{}", envelope.data);
        envelope
    }

    /// `/main` the way the real client does it: reply, then unwedge the
    /// server's data task, then drain the server's CLOSE.
    async fn back_to_menu(&mut self, username: &str) {
        let reply = self.command(CommandKind::Main, username, "").await;
        assert!(reply.successful, "{}", reply.arguments);
        assert_eq!(reply.arguments, "Success");
        self.send_data(DataKind::Close, "", "").await;
        let close = self.recv_data().await;
        assert_eq!(close.kind, DataKind::Close);
    }

    /// The four-step exit handshake.
    async fn exit(mut self) {
        let reply = self.command(CommandKind::Exit, "", "").await;
        assert_eq!(reply.arguments, "READY");
        self.data.send(DataEnvelope::close()).await.unwrap();
        let reply = self.command(CommandKind::Exit, "", "CLOSE_SENT").await;
        assert_eq!(reply.arguments, "CLOSING");
    }
}

// ── Scenarios ────────────────────────────────────────────────────

/// S1: register, message into an empty channel, exit; the slot frees up.
#[tokio::test]
async fn register_message_exit() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", "Secret1!").await;
    assert_eq!(alice.enter_menu().await, vec!["nonsense"]);

    let join = alice.join_channel(0).await;
    assert_eq!(join.username, "alice");
    assert!(join.data.contains("alice"), "{}", join.data);

    alice.send_data(DataKind::Message, "alice", "hi").await;
    alice.exit().await;

    // The account is free to log in again, so the session really ended.
    let mut again = TestClient::connect(addr).await;
    again.login("alice", "Secret1!").await;
    again.exit().await;
}

/// S2: two clients in the default channel; one message is delivered exactly
/// once; /main produces a LEAVE_MSG and stops further delivery.
#[tokio::test]
async fn two_clients_crosstalk() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", "Secret1!").await;
    alice.enter_menu().await;
    alice.join_channel(0).await;

    let mut bobby = TestClient::connect(addr).await;
    bobby.register("bobby", "Secret1!").await;
    bobby.enter_menu().await;
    bobby.join_channel(0).await;

    // Alice sees bobby arrive.
    let join = alice.recv_data().await;
    assert_eq!(join.kind, DataKind::Join);
    assert_eq!(join.username, "bobby");

    alice.send_data(DataKind::Message, "alice", "hello").await;
    let message = bobby.recv_data().await;
    assert_eq!(message.kind, DataKind::Message);
    assert_eq!(message.username, "alice");
    assert_eq!(message.data, "hello");

    alice.back_to_menu("alice").await;
    let leave = bobby.recv_data().await;
    assert_eq!(leave.kind, DataKind::Leave);
    assert!(leave.data.contains("alice"), "{}", leave.data);

    // Fan-out no longer includes alice: the next frame she gets is the
    // channel list, not bobby's message.
    bobby.send_data(DataKind::Message, "bobby", "anyone?").await;
    assert_eq!(alice.enter_menu().await, vec!["nonsense"]);
}

/// S3: the admin promotes and bans; the role lands on disk and the banned
/// account is refused at login.
#[tokio::test]
async fn admin_promotes_and_bans() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let carol = {
        let mut carol = TestClient::connect(addr).await;
        carol.register("carol", "Secret1!").await;
        carol
    };
    carol.exit().await;

    let mut admin = TestClient::connect(addr).await;
    admin.login("Admin", "gochat").await;

    let reply = admin.command(CommandKind::AddMod, "Admin", "carol").await;
    assert!(reply.successful, "{}", reply.arguments);
    assert_eq!(reply.arguments, "Successfully gave carol the moderator role");

    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("carol")).unwrap())
            .unwrap();
    assert_eq!(on_disk["Role"], 1);

    let reply = admin.command(CommandKind::BanServer, "Admin", "carol").await;
    assert!(reply.successful, "{}", reply.arguments);

    let mut carol = TestClient::connect(addr).await;
    carol.send_data(DataKind::MenuOption, "", "LOGIN").await;
    carol.send_data(DataKind::Login, "carol", "carol").await;
    let verdict = carol.recv_data().await;
    assert_eq!(verdict.kind, DataKind::Deny);
    assert_eq!(verdict.data, "This account is banned from the server");
}

/// S4: a second login to the same account is refused; the first session is
/// untouched.
#[tokio::test]
async fn duplicate_login_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut first = TestClient::connect(addr).await;
    first.register("alice", "Secret1!").await;

    let mut second = TestClient::connect(addr).await;
    second.send_data(DataKind::MenuOption, "", "LOGIN").await;
    second.send_data(DataKind::Login, "alice", "alice").await;
    let verdict = second.recv_data().await;
    assert_eq!(verdict.kind, DataKind::Deny);
    assert_eq!(verdict.data, "This account is already logged in somewhere");

    // The first session still works.
    assert_eq!(first.enter_menu().await, vec!["nonsense"]);
    first.join_channel(0).await;
}

/// S5: a public user cannot create channels, and the refusal changes
/// nothing.
#[tokio::test]
async fn permission_denied_leaves_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut bobby = TestClient::connect(addr).await;
    bobby.register("bobby", "Secret1!").await;

    let reply = bobby.command(CommandKind::Create, "bobby", "cats").await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "You don't have permission to use this command");

    assert_eq!(bobby.enter_menu().await, vec!["nonsense"]);
}

/// A promoted moderator creates a channel; the reply carries the new list
/// and a client sitting in the main menu is refreshed.
#[tokio::test]
async fn moderator_creates_channel() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut carol = TestClient::connect(addr).await;
    carol.register("carol", "Secret1!").await;

    let mut admin = TestClient::connect(addr).await;
    admin.login("Admin", "gochat").await;
    let reply = admin.command(CommandKind::AddMod, "Admin", "carol").await;
    assert!(reply.successful, "{}", reply.arguments);

    // Admin parks in the main menu to observe the refresh.
    admin.enter_menu().await;

    // The promotion reached carol's live session: create now succeeds.
    let reply = carol.command(CommandKind::Create, "carol", "cats").await;
    assert!(reply.successful, "{}", reply.arguments);
    assert_eq!(reply.arguments, "nonsense cats");

    let refresh = admin.recv_data().await;
    assert_eq!(refresh.kind, DataKind::Refresh);
    assert_eq!(refresh.data, "nonsense cats");
}

/// CHANGE_TOPIC renames by topic and spares the default channel.
#[tokio::test]
async fn change_topic_rules() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut admin = TestClient::connect(addr).await;
    admin.login("Admin", "gochat").await;

    let reply = admin.command(CommandKind::Create, "Admin", "cats").await;
    assert!(reply.successful, "{}", reply.arguments);

    let reply = admin
        .command(CommandKind::ChangeTopic, "Admin", "cats:dogs")
        .await;
    assert!(reply.successful, "{}", reply.arguments);
    assert_eq!(reply.arguments, "nonsense dogs");

    let reply = admin
        .command(CommandKind::ChangeTopic, "Admin", "nonsense:serious")
        .await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "Cannot change the topic of the default channel");

    let reply = admin
        .command(CommandKind::ChangeTopic, "Admin", "ghosts:dogs")
        .await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "No channel found with that topic");
}

/// Ban restrictions: no self-ban, no banning the admin, moderators may only
/// ban the public.
#[tokio::test]
async fn ban_restrictions() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    // Two accounts the admin will promote, one public victim.
    let carol_session = {
        let mut c = TestClient::connect(addr).await;
        c.register("carol", "Secret1!").await;
        c
    };
    let david = {
        let mut d = TestClient::connect(addr).await;
        d.register("david", "Secret1!").await;
        d
    };
    david.exit().await;
    let evelyn = {
        let mut e = TestClient::connect(addr).await;
        e.register("evelyn", "Secret1!").await;
        e
    };
    evelyn.exit().await;

    let mut admin = TestClient::connect(addr).await;
    admin.login("Admin", "gochat").await;

    let reply = admin.command(CommandKind::BanServer, "Admin", "Admin").await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "You cannot ban yourself");

    admin.command(CommandKind::AddMod, "Admin", "carol").await;
    admin.command(CommandKind::AddMod, "Admin", "david").await;

    let mut carol = carol_session;
    let reply = carol.command(CommandKind::BanServer, "carol", "Admin").await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "The admin cannot be banned");

    let reply = carol.command(CommandKind::BanServer, "carol", "david").await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "Only the admin can ban moderators");

    let reply = carol.command(CommandKind::BanServer, "carol", "evelyn").await;
    assert!(reply.successful, "{}", reply.arguments);
    assert_eq!(reply.arguments, "Successfully banned evelyn from the server");

    // The admin may ban moderators.
    let reply = admin.command(CommandKind::BanServer, "Admin", "david").await;
    assert!(reply.successful, "{}", reply.arguments);
}

/// HELP replies with the role digit and restores the saved state.
#[tokio::test]
async fn help_reports_role_and_restores_state() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut bobby = TestClient::connect(addr).await;
    bobby.register("bobby", "Secret1!").await;

    let reply = bobby.command(CommandKind::Help, "bobby", "").await;
    assert!(reply.successful);
    assert_eq!(reply.arguments, "0");
    bobby
        .control
        .send(CommandEnvelope::request(CommandKind::Help, "bobby", "DONE"))
        .await
        .unwrap();

    // Back in the main menu as if nothing happened.
    assert_eq!(bobby.enter_menu().await, vec!["nonsense"]);

    let mut admin = TestClient::connect(addr).await;
    admin.login("Admin", "gochat").await;
    let reply = admin.command(CommandKind::Help, "Admin", "").await;
    assert_eq!(reply.arguments, "2");
    admin
        .control
        .send(CommandEnvelope::request(CommandKind::Help, "Admin", "DONE"))
        .await
        .unwrap();
}

/// Reserved commands reply "not implemented"; unknown commands do not
/// exist. Both leave the session usable.
#[tokio::test]
async fn reserved_and_unknown_commands() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut bobby = TestClient::connect(addr).await;
    bobby.register("bobby", "Secret1!").await;

    for kind in [
        CommandKind::LogOut,
        CommandKind::ListChannel,
        CommandKind::ListServer,
        CommandKind::DisconnectChannel,
        CommandKind::DisconnectServer,
        CommandKind::BanChannel,
        CommandKind::Delete,
    ] {
        let reply = bobby.command(kind, "bobby", "").await;
        assert!(!reply.successful);
        assert_eq!(reply.arguments, "Command not implemented");
    }

    let reply = bobby.command(CommandKind::Dne, "bobby", "").await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "Command does not exist");

    assert_eq!(bobby.enter_menu().await, vec!["nonsense"]);
}

/// ESC between the registration steps rolls the reserved name back.
#[tokio::test]
async fn esc_rolls_back_partial_registration() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut alice = TestClient::connect(addr).await;
    alice.send_data(DataKind::MenuOption, "", "REGISTER").await;
    alice.send_data(DataKind::Registration, "alice", "alice").await;
    let verdict = alice.recv_data().await;
    assert_eq!(verdict.kind, DataKind::Accept);

    // Abandon before the password; nothing must stick.
    alice.send_data(DataKind::Esc, "", "").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The abandoned attempt never reached the registry.
    assert!(!dir.path().join("alice").exists());

    // The same name registers cleanly, even from another client.
    let mut other = TestClient::connect(addr).await;
    other.register("alice", "Secret1!").await;
    assert!(dir.path().join("alice").exists());
    assert_eq!(other.enter_menu().await, vec!["nonsense"]);

    // And the first client is back at the sign-in menu, able to log in as
    // someone else entirely... or just leave.
    alice.send_data(DataKind::MenuOption, "", "LOGIN").await;
    alice.send_data(DataKind::Login, "alice", "alice").await;
    let verdict = alice.recv_data().await;
    assert_eq!(verdict.kind, DataKind::Deny);
    assert_eq!(verdict.data, "This account is already logged in somewhere");
}

/// A full server answers the control connection with one DENY and closes;
/// an exit frees the seat again.
#[tokio::test]
async fn server_full_denies_admission() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 1, 10).await;

    let seated = TestClient::connect(addr).await;

    let refused = TcpStream::connect(addr).await.unwrap();
    let mut refused = Framed::new(refused, JsonCodec::<DataEnvelope>::default());
    let deny = timeout(TICK, refused.next())
        .await
        .expect("timed out waiting for the DENY")
        .expect("connection closed before the DENY")
        .expect("bad frame");
    assert_eq!(deny.kind, DataKind::Deny);
    assert_eq!(deny.data, "Server is full. Try again later");
    assert!(timeout(TICK, refused.next()).await.unwrap().is_none());

    seated.exit().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut replacement = TestClient::connect(addr).await;
    replacement.register("alice", "Secret1!").await;
}

/// A full channel table refuses creation with no state change.
#[tokio::test]
async fn channel_table_full() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 2).await;

    let mut admin = TestClient::connect(addr).await;
    admin.login("Admin", "gochat").await;

    let reply = admin.command(CommandKind::Create, "Admin", "cats").await;
    assert!(reply.successful, "{}", reply.arguments);

    let reply = admin.command(CommandKind::Create, "Admin", "dogs").await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "Maximum number of channels");

    assert_eq!(admin.enter_menu().await, vec!["nonsense", "cats"]);
}

/// Registered accounts survive a server restart with identical fields.
#[tokio::test]
async fn accounts_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (addr, server) = spawn_server(dir.path(), 20, 10).await;
    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", "Secret1!").await;
    alice.exit().await;
    server.abort();

    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;
    let mut alice = TestClient::connect(addr).await;
    alice.login("alice", "Secret1!").await;
    alice.exit().await;
}

/// Wrong argument counts are refused with the usage messages.
#[tokio::test]
async fn argument_count_checks() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut admin = TestClient::connect(addr).await;
    admin.login("Admin", "gochat").await;

    let reply = admin.command(CommandKind::Create, "Admin", "").await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "Not enough arguments");

    let reply = admin.command(CommandKind::Create, "Admin", "cats:dogs").await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "Too many arguments");

    let reply = admin.command(CommandKind::ChangeTopic, "Admin", "cats").await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "Not enough arguments");
}

/// Commands gated on sign-in refuse anonymous callers.
#[tokio::test]
async fn commands_require_sign_in() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut anon = TestClient::connect(addr).await;
    let reply = anon.command(CommandKind::Create, "", "cats").await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "Command not available. Must sign in first.");

    let reply = anon.command(CommandKind::Main, "", "").await;
    assert!(!reply.successful);
    assert_eq!(reply.arguments, "Command not available. Must sign in first.");
}

/// The bundled client session, driven through the UI contract against a
/// live server, alongside a scripted peer.
#[tokio::test]
async fn client_session_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    // A scripted peer waits in the default channel.
    let mut bobby = TestClient::connect(addr).await;
    bobby.register("bobby", "Secret1!").await;
    bobby.enter_menu().await;
    bobby.join_channel(0).await;

    // The real session runs on scripted UI channels.
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let ui = UiHandle {
        input: input_rx,
        events: event_tx,
    };
    let config = client::Config {
        server_addr: addr.to_string(),
        data_addr: "127.0.0.1:0".into(),
    };
    let session = Session::connect(&config, ui).await.unwrap();
    let session = tokio::spawn(session.run());

    for line in ["register", "alice", "Secret1!", "0", "hello bobby", "/exit"] {
        input_tx.send(UiInput::Line(line.into())).unwrap();
    }

    // The peer sees the join and exactly the one message.
    let join = bobby.recv_data().await;
    assert_eq!(join.kind, DataKind::Join);
    assert_eq!(join.username, "alice");
    let message = bobby.recv_data().await;
    assert_eq!(message.kind, DataKind::Message);
    assert_eq!(message.username, "alice");
    assert_eq!(message.data, "hello bobby");

    timeout(TICK, session)
        .await
        .expect("session never finished")
        .unwrap()
        .unwrap();

    let mut saw_sign_in_menu = false;
    let mut saw_channel_menu = false;
    let mut saw_shutdown = false;
    while let Ok(event) = event_rx.try_recv() {
        match event {
            UiEvent::SignInMenu => saw_sign_in_menu = true,
            UiEvent::Menu(topics) => {
                assert_eq!(topics, vec!["nonsense"]);
                saw_channel_menu = true;
            }
            UiEvent::Shutdown => saw_shutdown = true,
            _ => {}
        }
    }
    assert!(saw_sign_in_menu);
    assert!(saw_channel_menu);
    assert!(saw_shutdown);
}

/// An out-of-range or non-numeric channel selection is refused and the menu
/// stays usable.
#[tokio::test]
async fn invalid_channel_selection() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", "Secret1!").await;
    alice.enter_menu().await;

    alice.send_data(DataKind::MenuOption, "", "7").await;
    let verdict = alice.recv_data().await;
    assert_eq!(verdict.kind, DataKind::Deny);
    assert_eq!(verdict.data, "Invalid channel selection");

    alice.send_data(DataKind::MenuOption, "", "first").await;
    let verdict = alice.recv_data().await;
    assert_eq!(verdict.kind, DataKind::Deny);

    alice.join_channel(0).await;
}

/// Username rejections surface the targeted message and leave the flow
/// retryable.
#[tokio::test]
async fn registration_rejections() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = spawn_server(dir.path(), 20, 10).await;

    let mut client = TestClient::connect(addr).await;
    client.send_data(DataKind::MenuOption, "", "REGISTER").await;

    // Too short.
    client.send_data(DataKind::Registration, "abc", "abc").await;
    let verdict = client.recv_data().await;
    assert_eq!(verdict.kind, DataKind::Deny);
    assert_eq!(verdict.data, "Username has invalid character or formatting");

    // Acceptable after the rejection.
    client.send_data(DataKind::Registration, "alice", "alice").await;
    assert_eq!(client.recv_data().await.kind, DataKind::Accept);

    // Weak password, then a good one.
    client.send_data(DataKind::Registration, "alice", "weak").await;
    let verdict = client.recv_data().await;
    assert_eq!(verdict.kind, DataKind::Deny);
    assert_eq!(verdict.data, "Password has invalid character or formatting");

    client.send_data(DataKind::Registration, "alice", "Secret1!").await;
    assert_eq!(client.recv_data().await.kind, DataKind::Accept);

    // A second client cannot take the name now.
    let mut taken = TestClient::connect(addr).await;
    taken.send_data(DataKind::MenuOption, "", "REGISTER").await;
    taken.send_data(DataKind::Registration, "alice", "alice").await;
    let verdict = taken.recv_data().await;
    assert_eq!(verdict.kind, DataKind::Deny);
    assert_eq!(verdict.data, "Username already taken");
}
