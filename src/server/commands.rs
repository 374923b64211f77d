//! Control-side command dispatcher.
//!
//! Reads command envelopes from the control connection and handles each one
//! synchronously: every command gets exactly one reply before the next is
//! read. Commands that change the data-side state commit the change first,
//! then emit the CLOSE data envelope, then the reply.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures::SinkExt;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::state::SessionState;
use crate::wire::{split_args, CommandEnvelope, CommandKind, DataEnvelope, Role};

use super::worker::WorkerError;
use super::{ControlFramed, Server};

const NOT_SIGNED_IN: &str = "Command not available. Must sign in first.";
const NO_PERMISSION: &str = "You don't have permission to use this command";
const NOT_ENOUGH_ARGS: &str = "Not enough arguments";
const TOO_MANY_ARGS: &str = "Too many arguments";
const NOT_IMPLEMENTED: &str = "Command not implemented";

/// Read and dispatch commands until the client exits or disconnects.
pub(crate) async fn control_task(
    server: Arc<Server>,
    slot: usize,
    mut framed: ControlFramed,
) -> Result<(), WorkerError> {
    while let Some(frame) = framed.next().await {
        let command = frame?;
        if dispatch(&server, slot, &command, &mut framed)
            .await?
            .is_break()
        {
            info!(slot, "closing control task");
            return Ok(());
        }
    }
    // EOF: the client went away without the handshake.
    Ok(())
}

/// Handle one command; `Break` ends the control task after an EXIT
/// handshake.
async fn dispatch(
    server: &Server,
    slot: usize,
    command: &CommandEnvelope,
    framed: &mut ControlFramed,
) -> Result<ControlFlow<()>, WorkerError> {
    info!(slot, kind = ?command.kind, "received command");

    match command.kind {
        CommandKind::Help => {
            help(server, slot, command, framed).await?;
            Ok(ControlFlow::Continue(()))
        }
        CommandKind::Exit => {
            exit(server, slot, command, framed).await?;
            Ok(ControlFlow::Break(()))
        }
        CommandKind::Main => {
            let reply = to_main_menu(server, slot, command).await;
            framed.send(reply).await?;
            Ok(ControlFlow::Continue(()))
        }
        CommandKind::Create => {
            let reply = create(server, slot, command).await?;
            framed.send(reply).await?;
            Ok(ControlFlow::Continue(()))
        }
        CommandKind::ChangeTopic => {
            let reply = change_topic(server, slot, command).await?;
            framed.send(reply).await?;
            Ok(ControlFlow::Continue(()))
        }
        CommandKind::AddMod | CommandKind::RmMod => {
            let reply = set_moderator(server, slot, command).await?;
            framed.send(reply).await?;
            Ok(ControlFlow::Continue(()))
        }
        CommandKind::BanServer => {
            let reply = ban_from_server(server, slot, command).await?;
            framed.send(reply).await?;
            Ok(ControlFlow::Continue(()))
        }
        CommandKind::LogOut
        | CommandKind::ListChannel
        | CommandKind::ListServer
        | CommandKind::DisconnectChannel
        | CommandKind::DisconnectServer
        | CommandKind::BanChannel
        | CommandKind::Delete => {
            // Reserved in the protocol; no handler.
            framed
                .send(CommandEnvelope::reply(command, false, NOT_IMPLEMENTED))
                .await?;
            Ok(ControlFlow::Continue(()))
        }
        CommandKind::Dne => {
            framed
                .send(CommandEnvelope::reply(command, false, "Command does not exist"))
                .await?;
            Ok(ControlFlow::Continue(()))
        }
        CommandKind::Connect => {
            // Only valid as the very first control frame.
            Err(WorkerError::OutOfSync {
                expected: "a command",
                got: "CONNECT".into(),
            })
        }
    }
}

/// HELP: park the data side in the help screen, reply with the caller's role
/// digit, await DONE, restore the saved state.
async fn help(
    server: &Server,
    slot: usize,
    command: &CommandEnvelope,
    framed: &mut ControlFramed,
) -> Result<(), WorkerError> {
    let (previous, role) = {
        let mut roster = server.roster.lock().await;
        let (previous, role) = match roster.get(slot) {
            Some(client) => (client.state, client.role),
            None => (SessionState::Quitting, Role::Public),
        };
        roster.set_state(slot, SessionState::InHelpScreen);
        (previous, role)
    };

    framed
        .send(CommandEnvelope::reply(command, true, role.to_string()))
        .await?;

    let done = framed.next().await.ok_or(WorkerError::Disconnected)??;
    if done.arguments != "DONE" {
        return Err(WorkerError::UnexpectedData(done.arguments));
    }

    server.roster.lock().await.set_state(slot, previous);
    Ok(())
}

/// EXIT: the four-step orderly shutdown handshake. The client sends the
/// data-side CLOSE between READY and CLOSE_SENT, so by CLOSING the data task
/// is already on its way out.
async fn exit(
    server: &Server,
    slot: usize,
    command: &CommandEnvelope,
    framed: &mut ControlFramed,
) -> Result<(), WorkerError> {
    server
        .roster
        .lock()
        .await
        .set_state(slot, SessionState::Quitting);

    framed
        .send(CommandEnvelope::reply(command, true, "READY"))
        .await?;

    let ack = framed.next().await.ok_or(WorkerError::Disconnected)??;
    if ack.kind != CommandKind::Exit || ack.arguments != "CLOSE_SENT" {
        return Err(WorkerError::UnexpectedData(ack.arguments.clone()));
    }

    framed
        .send(CommandEnvelope::reply(command, true, "CLOSING"))
        .await?;
    info!(slot, "exit handshake complete");
    Ok(())
}

/// MAIN: leave the current channel and return to the main menu.
async fn to_main_menu(server: &Server, slot: usize, command: &CommandEnvelope) -> CommandEnvelope {
    let (channel, logged_in) = {
        let roster = server.roster.lock().await;
        match roster.get(slot) {
            Some(client) => (client.current_channel, client.logged_in),
            None => (None, false),
        }
    };

    if !logged_in {
        return CommandEnvelope::reply(command, false, NOT_SIGNED_IN);
    }
    if channel.is_none() {
        return CommandEnvelope::reply(command, false, "You are not in a channel");
    }

    server
        .leave_channel(slot, Some(SessionState::InMainMenu))
        .await;

    // Unwedge the client's messaging loop, then confirm on control.
    server.roster.lock().await.send_data(slot, DataEnvelope::close());
    CommandEnvelope::reply(command, true, "Success")
}

/// CREATE: allocate a channel slot; the reply carries the updated list and
/// other main-menu clients get a REFRESH.
async fn create(
    server: &Server,
    slot: usize,
    command: &CommandEnvelope,
) -> Result<CommandEnvelope, WorkerError> {
    if let Some(refusal) = require_role(server, slot, Role::Moderator).await {
        return Ok(CommandEnvelope::reply(command, false, refusal));
    }
    let args = split_args(&command.arguments);
    if args.is_empty() || args[0].is_empty() {
        return Ok(CommandEnvelope::reply(command, false, NOT_ENOUGH_ARGS));
    }
    if args.len() > 1 {
        return Ok(CommandEnvelope::reply(command, false, TOO_MANY_ARGS));
    }

    let list = {
        let mut channels = server.channels.lock().await;
        match channels.create(args[0]) {
            Ok(id) => {
                info!(slot, topic = args[0], channel = id, "created channel");
                channels.list_line()
            }
            Err(e) => return Ok(CommandEnvelope::reply(command, false, e.to_string())),
        }
    };

    server.refresh_main_menus(slot).await;
    Ok(CommandEnvelope::reply(command, true, list))
}

/// CHANGE_TOPIC: rename a channel found by its current topic.
async fn change_topic(
    server: &Server,
    slot: usize,
    command: &CommandEnvelope,
) -> Result<CommandEnvelope, WorkerError> {
    if let Some(refusal) = require_role(server, slot, Role::Moderator).await {
        return Ok(CommandEnvelope::reply(command, false, refusal));
    }
    let args = split_args(&command.arguments);
    if args.len() < 2 {
        return Ok(CommandEnvelope::reply(command, false, NOT_ENOUGH_ARGS));
    }
    if args.len() > 2 {
        return Ok(CommandEnvelope::reply(command, false, TOO_MANY_ARGS));
    }

    let list = {
        let mut channels = server.channels.lock().await;
        let Some(id) = channels.find_by_topic(args[0]) else {
            return Ok(CommandEnvelope::reply(
                command,
                false,
                "No channel found with that topic",
            ));
        };
        if id == 0 {
            return Ok(CommandEnvelope::reply(
                command,
                false,
                "Cannot change the topic of the default channel",
            ));
        }
        channels.change_topic(id, args[1]);
        info!(slot, from = args[0], to = args[1], "changed channel topic");
        channels.list_line()
    };

    server.refresh_main_menus(slot).await;
    Ok(CommandEnvelope::reply(command, true, list))
}

/// ADD_MOD / RM_MOD: admin-only role mutation, written through to disk and
/// into any live slot's cached role.
async fn set_moderator(
    server: &Server,
    slot: usize,
    command: &CommandEnvelope,
) -> Result<CommandEnvelope, WorkerError> {
    if let Some(refusal) = require_role(server, slot, Role::Admin).await {
        return Ok(CommandEnvelope::reply(command, false, refusal));
    }
    let args = split_args(&command.arguments);
    if args.is_empty() || args[0].is_empty() {
        return Ok(CommandEnvelope::reply(command, false, NOT_ENOUGH_ARGS));
    }
    if args.len() > 1 {
        return Ok(CommandEnvelope::reply(command, false, TOO_MANY_ARGS));
    }
    let target = args[0];
    let promoting = command.kind == CommandKind::AddMod;

    let mut registry = server.registry.lock().await;
    let Some(index) = registry.lookup(target) else {
        return Ok(CommandEnvelope::reply(
            command,
            false,
            "No account found with that username",
        ));
    };
    let current = registry.get(index).role;
    if current == Role::Admin {
        return Ok(CommandEnvelope::reply(
            command,
            false,
            "The admin's role cannot be changed",
        ));
    }
    if promoting && current == Role::Moderator {
        return Ok(CommandEnvelope::reply(
            command,
            false,
            format!("{target} is already a moderator"),
        ));
    }
    if !promoting && current != Role::Moderator {
        return Ok(CommandEnvelope::reply(
            command,
            false,
            format!("{target} is not a moderator"),
        ));
    }

    let role = if promoting {
        Role::Moderator
    } else {
        Role::Public
    };
    registry.set_role(target, role)?;

    // Keep any live session's cached role in step.
    let mut roster = server.roster.lock().await;
    if let Some(live) = roster.find_by_username(target) {
        if let Some(client) = roster.get_mut(live) {
            client.role = role;
        }
    }

    info!(slot, target, ?role, "changed account role");
    let text = if promoting {
        format!("Successfully gave {target} the moderator role")
    } else {
        format!("Successfully removed the moderator role from {target}")
    };
    Ok(CommandEnvelope::reply(command, true, text))
}

/// BAN_S: flag an account as banned, blocking its next login.
async fn ban_from_server(
    server: &Server,
    slot: usize,
    command: &CommandEnvelope,
) -> Result<CommandEnvelope, WorkerError> {
    if let Some(refusal) = require_role(server, slot, Role::Moderator).await {
        return Ok(CommandEnvelope::reply(command, false, refusal));
    }
    let args = split_args(&command.arguments);
    if args.is_empty() || args[0].is_empty() {
        return Ok(CommandEnvelope::reply(command, false, NOT_ENOUGH_ARGS));
    }
    if args.len() > 1 {
        return Ok(CommandEnvelope::reply(command, false, TOO_MANY_ARGS));
    }
    let target = args[0];

    let (caller_role, caller_name) = {
        let roster = server.roster.lock().await;
        match roster.get(slot) {
            Some(client) => (client.role, client.username.clone()),
            None => (Role::Public, String::new()),
        }
    };
    if target == caller_name {
        return Ok(CommandEnvelope::reply(command, false, "You cannot ban yourself"));
    }

    let mut registry = server.registry.lock().await;
    let Some(index) = registry.lookup(target) else {
        return Ok(CommandEnvelope::reply(
            command,
            false,
            "No account found with that username",
        ));
    };
    let account = registry.get(index);
    if account.role == Role::Admin {
        return Ok(CommandEnvelope::reply(command, false, "The admin cannot be banned"));
    }
    if account.role == Role::Moderator && caller_role < Role::Admin {
        return Ok(CommandEnvelope::reply(
            command,
            false,
            "Only the admin can ban moderators",
        ));
    }
    if account.banned {
        return Ok(CommandEnvelope::reply(
            command,
            false,
            format!("{target} is already banned from the server"),
        ));
    }

    registry.set_banned(target, true)?;
    warn!(slot, target, "banned account from the server");
    Ok(CommandEnvelope::reply(
        command,
        true,
        format!("Successfully banned {target} from the server"),
    ))
}

/// The shared sign-in and role gate. Returns the refusal text, or `None` if
/// the caller may proceed.
async fn require_role(server: &Server, slot: usize, minimum: Role) -> Option<&'static str> {
    let roster = server.roster.lock().await;
    let Some(client) = roster.get(slot) else {
        return Some(NOT_SIGNED_IN);
    };
    if !client.logged_in {
        return Some(NOT_SIGNED_IN);
    }
    if client.role < minimum {
        return Some(NO_PERMISSION);
    }
    None
}
