//! The UI contract and the bundled terminal implementation.
//!
//! The session core talks to its user interface through a channel pair:
//! [`UiInput`] flows from the interface to the session, [`UiEvent`] flows
//! back. The terminal implementation below reads stdin lines and renders
//! events with plain prints; tests substitute their own channel ends and
//! script the exchange.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::wire::Role;

/// Input from the user interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiInput {
    /// One line of user input.
    Line(String),
    /// The user abandoned the current prompt (back to the previous menu).
    Esc,
}

/// Output for the user interface to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// The sign-in menu is on screen.
    SignInMenu,
    /// A free-text prompt.
    Prompt(String),
    Info(String),
    Error(String),
    /// A chat message in the current channel.
    Chat { from: String, text: String },
    /// A join/leave announcement in the current channel.
    Notice(String),
    /// The channel menu: topics in selection order.
    Menu(Vec<String>),
    /// The help screen for the given role; dismissed by the next input.
    Help(Role),
    /// The session is over.
    Shutdown,
}

/// The session's ends of the interface channels.
#[derive(Debug)]
pub struct UiHandle {
    pub input: mpsc::UnboundedReceiver<UiInput>,
    pub events: mpsc::UnboundedSender<UiEvent>,
}

/// Spawn the terminal interface: a stdin reader, a renderer, and a SIGINT
/// watcher that turns ctrl-c into the orderly `/exit`.
///
/// The literal line `/esc` maps to [`UiInput::Esc`]; everything else is a
/// plain line.
pub fn terminal() -> UiHandle {
    let (input_tx, input) = mpsc::unbounded_channel();
    let (events, mut event_rx) = mpsc::unbounded_channel();

    let stdin_tx = input_tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let input = if line.trim() == "/esc" {
                UiInput::Esc
            } else {
                UiInput::Line(line)
            };
            if stdin_tx.send(input).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let done = matches!(event, UiEvent::Shutdown);
            render(event);
            if done {
                break;
            }
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("failed to install the interrupt handler");
            return;
        }
        let _ = input_tx.send(UiInput::Line("/exit".into()));
    });

    UiHandle { input, events }
}

fn render(event: UiEvent) {
    match event {
        UiEvent::SignInMenu => {
            println!("-------------------------------------------------");
            println!("Welcome to rookery.");
            println!("  login     sign in to an existing account");
            println!("  register  create a new account");
            println!("  exit      leave");
            println!("-------------------------------------------------");
        }
        UiEvent::Prompt(text) => println!("{text}"),
        UiEvent::Info(text) => println!("system: {text}"),
        UiEvent::Error(text) => println!("system: {text}"),
        UiEvent::Chat { from, text } => println!("{from}: {text}"),
        UiEvent::Notice(text) => println!("-- {text} --"),
        UiEvent::Menu(topics) => {
            println!("-------------------------------------------------");
            println!("Channels (enter a number to join, quit to leave):");
            for (i, topic) in topics.iter().enumerate() {
                println!("  [{i}] {topic}");
            }
            println!("-------------------------------------------------");
        }
        UiEvent::Help(role) => {
            println!("-------------------------------------------------");
            println!("Commands:");
            println!("  /help                         this screen");
            println!("  /exit                         leave the server");
            println!("  /main                         back to the main menu");
            if role >= Role::Moderator {
                println!("  /create <topic>               create a channel");
                println!("  /change-topic <topic> <new>   rename a channel");
                println!("  /ban-s <user>                 ban a user from the server");
            }
            if role >= Role::Admin {
                println!("  /add-mod <user>               grant the moderator role");
                println!("  /rm-mod <user>                revoke the moderator role");
            }
            println!("Press enter to return.");
            println!("-------------------------------------------------");
        }
        UiEvent::Shutdown => println!("Goodbye."),
    }
}
