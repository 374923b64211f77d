//! Input-line command parsing.
//!
//! A command is a leading `/` followed by a name and space-separated
//! arguments. Unknown names map to [`CommandKind::Dne`] and travel to the
//! server like any other command, which answers that the command does not
//! exist.

use crate::wire::CommandKind;

/// Whether an input line is a command rather than data.
pub fn is_command(line: &str) -> bool {
    line.trim_start().starts_with('/')
}

/// Parse a command line into its kind and arguments.
pub fn parse(line: &str) -> (CommandKind, Vec<String>) {
    let body = line.trim().trim_start_matches('/');
    let mut tokens = body.split_whitespace();
    let kind = match tokens.next().unwrap_or("") {
        "help" => CommandKind::Help,
        "exit" => CommandKind::Exit,
        "main" => CommandKind::Main,
        "log-out" => CommandKind::LogOut,
        "list-c" => CommandKind::ListChannel,
        "list-s" => CommandKind::ListServer,
        "disconnect-c" => CommandKind::DisconnectChannel,
        "disconnect-s" => CommandKind::DisconnectServer,
        "ban-c" => CommandKind::BanChannel,
        "ban-s" => CommandKind::BanServer,
        "create" => CommandKind::Create,
        "delete" => CommandKind::Delete,
        "change-topic" => CommandKind::ChangeTopic,
        "add-mod" => CommandKind::AddMod,
        "rm-mod" => CommandKind::RmMod,
        _ => CommandKind::Dne,
    };
    (kind, tokens.map(str::to_owned).collect())
}
