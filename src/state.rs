//! The shared session state variable.
//!
//! Both peers track one state value per client and drive it to agree through
//! the protocol: the server holds it in the roster slot, the client in its
//! session. Commands arriving on the control connection may change it while
//! the data task is mid-read; the CLOSE data envelope unwedges the read so
//! the loop can resynchronize on the new value.

/// Where a client is in its lifecycle, from first prompt to teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Selecting between logging in, registering, and exiting.
    #[default]
    ChoosingSignInOpt,
    /// Two-step registration: username, then password.
    Registering,
    /// Two-step login: username, then password.
    LoggingIn,
    /// Browsing the channel list.
    InMainMenu,
    /// Inside a channel, exchanging messages.
    Messaging,
    /// Reading the help screen; returns to the saved prior state.
    InHelpScreen,
    /// Terminal state; the worker tears down.
    Quitting,
}
