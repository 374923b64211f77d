//! Client roster — the fixed-size table of live clients.
//!
//! A slot's index is the client's identity while connected. Each slot caches
//! the owning account's username and role, tracks login status, current
//! channel, and session state, and holds the handle used to write to the
//! client's data socket. State changes ping the slot's `Notify` so a parked
//! data task can resynchronize.

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::state::SessionState;
use crate::wire::{DataEnvelope, Role};

/// A live client's server-side record.
#[derive(Debug)]
pub struct ActiveClient {
    /// Cached username; empty until a sign-in flow reserves one.
    pub username: String,
    pub role: Role,
    pub logged_in: bool,
    pub current_channel: Option<usize>,
    pub state: SessionState,
    /// All data-socket writes funnel through this sender to the slot's
    /// writer task; no lock is held across socket I/O.
    pub data_tx: mpsc::UnboundedSender<DataEnvelope>,
    /// Pinged on every state change.
    pub state_changed: Arc<Notify>,
}

/// Fixed-size table of client slots. A `None` slot is free.
#[derive(Debug)]
pub struct Roster {
    slots: Vec<Option<ActiveClient>>,
}

impl Roster {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Claim a free slot for a newly admitted client.
    pub fn allocate(&mut self, data_tx: mpsc::UnboundedSender<DataEnvelope>) -> Option<usize> {
        let free = self.slots.iter().position(|slot| slot.is_none())?;
        self.slots[free] = Some(ActiveClient {
            username: String::new(),
            role: Role::Public,
            logged_in: false,
            current_channel: None,
            state: SessionState::ChoosingSignInOpt,
            data_tx,
            state_changed: Arc::new(Notify::new()),
        });
        Some(free)
    }

    /// Reset a slot to free.
    pub fn release(&mut self, slot: usize) {
        self.slots[slot] = None;
    }

    pub fn get(&self, slot: usize) -> Option<&ActiveClient> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut ActiveClient> {
        self.slots.get_mut(slot).and_then(|s| s.as_mut())
    }

    /// The slot's current session state.
    pub fn state(&self, slot: usize) -> SessionState {
        self.get(slot).map_or(SessionState::Quitting, |c| c.state)
    }

    /// Commit a state change and wake anything parked on it.
    pub fn set_state(&mut self, slot: usize, state: SessionState) {
        if let Some(client) = self.get_mut(slot) {
            client.state = state;
            client.state_changed.notify_waiters();
        }
    }

    /// Occupied slots with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ActiveClient)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|c| (i, c)))
    }

    /// Whether any live slot holds this username (logged in or mid-sign-in).
    ///
    /// Together with the registry this enforces name uniqueness across the
    /// union of registered accounts and connected clients.
    pub fn username_held(&self, username: &str) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|c| c.username == username)
    }

    /// Slot id of the live client logged in under this username.
    pub fn find_by_username(&self, username: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|c| c.username == username))
    }

    /// Send a data envelope to a slot's writer task. A closed receiver means
    /// the client is tearing down; the envelope is dropped.
    pub fn send_data(&self, slot: usize, envelope: DataEnvelope) {
        if let Some(client) = self.get(slot) {
            let _ = client.data_tx.send(envelope);
        }
    }
}
