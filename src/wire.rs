//! Wire envelopes — the two JSON message families.
//!
//! Every frame on either connection is one of two envelope shapes:
//! data envelopes on the data connection (registration, login, menu
//! selections, chat traffic, lifecycle signals) and command envelopes on the
//! control connection (commands and their replies). Field names are
//! case-sensitive and stable; absent fields decode to zero values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Decode error for an out-of-range envelope kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown envelope kind {0}")]
pub struct BadKind(pub u8);

/// Kind tag of a data envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DataKind {
    /// A name, password, or selection was accepted.
    #[default]
    Accept = 0,
    /// A name, password, selection, or admission was refused.
    Deny = 1,
    /// A chat message within a channel.
    Message = 2,
    /// Someone joined the channel.
    Join = 3,
    /// Someone left the channel.
    Leave = 4,
    /// A username or password while registering.
    Registration = 5,
    /// A username or password while logging in.
    Login = 6,
    /// A menu selection (sign-in option or channel index).
    MenuOption = 7,
    /// Unwedge signal: the receiver leaves its current blocking read.
    Close = 8,
    /// Abandon the current sign-in flow and return to the menu.
    Esc = 9,
    /// Channel-list request ("READY") or the list itself.
    Refresh = 10,
}

impl From<DataKind> for u8 {
    fn from(kind: DataKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for DataKind {
    type Error = BadKind;

    fn try_from(value: u8) -> Result<Self, BadKind> {
        Ok(match value {
            0 => Self::Accept,
            1 => Self::Deny,
            2 => Self::Message,
            3 => Self::Join,
            4 => Self::Leave,
            5 => Self::Registration,
            6 => Self::Login,
            7 => Self::MenuOption,
            8 => Self::Close,
            9 => Self::Esc,
            10 => Self::Refresh,
            other => return Err(BadKind(other)),
        })
    }
}

/// Kind tag of a command envelope.
///
/// Several kinds are reserved in the protocol without a server handler; they
/// elicit a "Command not implemented" reply and are otherwise no-ops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum CommandKind {
    /// Command does not exist.
    #[default]
    Dne = 0,
    Help = 1,
    Exit = 2,
    Main = 3,
    LogOut = 4,
    ListChannel = 5,
    ListServer = 6,
    DisconnectChannel = 7,
    DisconnectServer = 8,
    BanChannel = 9,
    BanServer = 10,
    Create = 11,
    Delete = 12,
    ChangeTopic = 13,
    AddMod = 14,
    RmMod = 15,
    /// Establishes the data connection; only valid as the first control frame.
    Connect = 16,
}

impl From<CommandKind> for u8 {
    fn from(kind: CommandKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for CommandKind {
    type Error = BadKind;

    fn try_from(value: u8) -> Result<Self, BadKind> {
        Ok(match value {
            0 => Self::Dne,
            1 => Self::Help,
            2 => Self::Exit,
            3 => Self::Main,
            4 => Self::LogOut,
            5 => Self::ListChannel,
            6 => Self::ListServer,
            7 => Self::DisconnectChannel,
            8 => Self::DisconnectServer,
            9 => Self::BanChannel,
            10 => Self::BanServer,
            11 => Self::Create,
            12 => Self::Delete,
            13 => Self::ChangeTopic,
            14 => Self::AddMod,
            15 => Self::RmMod,
            16 => Self::Connect,
            other => return Err(BadKind(other)),
        })
    }
}

/// A user's role, in ascending order of authority.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Role {
    #[default]
    Public = 0,
    Moderator = 1,
    Admin = 2,
}

impl From<Role> for u8 {
    fn from(role: Role) -> u8 {
        role as u8
    }
}

impl TryFrom<u8> for Role {
    type Error = BadKind;

    fn try_from(value: u8) -> Result<Self, BadKind> {
        Ok(match value {
            0 => Self::Public,
            1 => Self::Moderator,
            2 => Self::Admin,
            other => return Err(BadKind(other)),
        })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// An envelope on the data connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEnvelope {
    #[serde(rename = "Type", default)]
    pub kind: DataKind,
    #[serde(rename = "Username", default)]
    pub username: String,
    #[serde(rename = "Data", default)]
    pub data: String,
}

impl DataEnvelope {
    pub fn new(kind: DataKind, username: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind,
            username: username.into(),
            data: data.into(),
        }
    }

    /// A bare unwedge signal.
    pub fn close() -> Self {
        Self::new(DataKind::Close, "", "")
    }
}

/// An envelope on the control connection.
///
/// `arguments` carries colon-packed command arguments on requests; on replies
/// it carries the success payload or a human-readable failure string, with
/// `successful` distinguishing the two.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "Type", default)]
    pub kind: CommandKind,
    #[serde(rename = "Username", default)]
    pub username: String,
    #[serde(rename = "Arguments", default)]
    pub arguments: String,
    #[serde(rename = "Successful", default)]
    pub successful: bool,
    #[serde(rename = "Message", default)]
    pub message: String,
}

impl CommandEnvelope {
    /// A command request carrying pre-packed arguments.
    pub fn request(kind: CommandKind, username: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            kind,
            username: username.into(),
            arguments: arguments.into(),
            successful: false,
            message: String::new(),
        }
    }

    /// A reply to `request`, echoing its kind and username.
    pub fn reply(request: &CommandEnvelope, successful: bool, arguments: impl Into<String>) -> Self {
        Self {
            kind: request.kind,
            username: request.username.clone(),
            arguments: arguments.into(),
            successful,
            message: String::new(),
        }
    }
}

/// Pack command arguments into the colon-separated wire form.
pub fn pack_args(args: &[&str]) -> String {
    args.join(":")
}

/// Split the colon-separated wire form back into arguments.
///
/// An empty string is zero arguments, not one empty argument.
pub fn split_args(packed: &str) -> Vec<&str> {
    if packed.is_empty() {
        Vec::new()
    } else {
        packed.split(':').collect()
    }
}
