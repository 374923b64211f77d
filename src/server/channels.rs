//! Channel table — fixed-capacity chat rooms with a permanent default.
//!
//! Slot 0 is the default channel and exists from boot; it can be neither
//! deleted nor renamed. Member lists hold roster slot ids in insertion
//! order, which is also the fan-out order.

/// The default channel's topic.
pub const DEFAULT_TOPIC: &str = "nonsense";

/// Error returned when every channel slot is occupied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Maximum number of channels")]
pub struct ChannelsFull;

#[derive(Debug)]
pub struct Channel {
    pub topic: String,
    pub members: Vec<usize>,
}

/// Fixed-size table of channels. A `None` slot is free.
#[derive(Debug)]
pub struct ChannelTable {
    slots: Vec<Option<Channel>>,
}

impl ChannelTable {
    /// A table of `capacity` slots with the default channel at slot 0.
    pub fn new(capacity: usize) -> Self {
        let mut slots: Vec<Option<Channel>> = (0..capacity).map(|_| None).collect();
        slots[0] = Some(Channel {
            topic: DEFAULT_TOPIC.into(),
            members: Vec::new(),
        });
        Self { slots }
    }

    /// Allocate a free slot for a new channel.
    pub fn create(&mut self, topic: &str) -> Result<usize, ChannelsFull> {
        let free = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(ChannelsFull)?;
        self.slots[free] = Some(Channel {
            topic: topic.into(),
            members: Vec::new(),
        });
        Ok(free)
    }

    /// Clear a slot. No-op for the default channel.
    pub fn delete(&mut self, id: usize) {
        if id != 0 && id < self.slots.len() {
            self.slots[id] = None;
        }
    }

    /// Rename a channel. No-op for the default channel.
    pub fn change_topic(&mut self, id: usize, topic: &str) {
        if id == 0 {
            return;
        }
        if let Some(Some(channel)) = self.slots.get_mut(id) {
            channel.topic = topic.into();
        }
    }

    /// Whether `id` names a live channel.
    pub fn is_live(&self, id: usize) -> bool {
        matches!(self.slots.get(id), Some(Some(_)))
    }

    /// Append a member if absent.
    pub fn join(&mut self, id: usize, slot: usize) {
        if let Some(Some(channel)) = self.slots.get_mut(id) {
            if !channel.members.contains(&slot) {
                channel.members.push(slot);
            }
        }
    }

    /// Remove a member, preserving the order of the rest.
    pub fn leave(&mut self, id: usize, slot: usize) {
        if let Some(Some(channel)) = self.slots.get_mut(id) {
            channel.members.retain(|&m| m != slot);
        }
    }

    /// Member slot ids of a channel, in insertion order.
    pub fn members(&self, id: usize) -> Vec<usize> {
        match self.slots.get(id) {
            Some(Some(channel)) => channel.members.clone(),
            _ => Vec::new(),
        }
    }

    /// Topics of live channels in slot order.
    pub fn list(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|c| c.topic.clone()))
            .collect()
    }

    /// The space-separated topic list sent to clients in the main menu.
    pub fn list_line(&self) -> String {
        self.list().join(" ")
    }

    /// Slot id of the live channel with this topic.
    pub fn find_by_topic(&self, topic: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|c| c.topic == topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // ── Boot state ───────────────────────────────────────────────

    #[test]
    fn default_channel_exists_at_boot() {
        let table = ChannelTable::new(10);
        assert!(table.is_live(0));
        assert_eq!(table.list(), vec!["nonsense"]);
        assert_eq!(table.find_by_topic("nonsense"), Some(0));
    }

    // ── Create / delete ──────────────────────────────────────────

    #[test]
    fn create_fills_lowest_free_slot() {
        let mut table = ChannelTable::new(10);
        assert_eq!(table.create("cats").unwrap(), 1);
        assert_eq!(table.create("dogs").unwrap(), 2);
        assert_eq!(table.list(), vec!["nonsense", "cats", "dogs"]);
    }

    #[test]
    fn create_reuses_deleted_slot() {
        let mut table = ChannelTable::new(10);
        let cats = table.create("cats").unwrap();
        table.create("dogs").unwrap();
        table.delete(cats);
        assert_eq!(table.create("birds").unwrap(), cats);
    }

    #[test]
    fn create_at_capacity_fails_without_change() {
        let mut table = ChannelTable::new(3);
        table.create("cats").unwrap();
        table.create("dogs").unwrap();
        assert_eq!(table.create("birds"), Err(ChannelsFull));
        assert_eq!(table.list(), vec!["nonsense", "cats", "dogs"]);
    }

    #[test]
    fn delete_and_rename_spare_the_default_channel() {
        let mut table = ChannelTable::new(10);
        table.delete(0);
        table.change_topic(0, "serious-business");
        assert!(table.is_live(0));
        assert_eq!(table.find_by_topic("nonsense"), Some(0));
    }

    #[test]
    fn create_then_delete_restores_prior_state() {
        let mut table = ChannelTable::new(10);
        let before = table.list();
        let id = table.create("cats").unwrap();
        table.delete(id);
        assert_eq!(table.list(), before);
        assert!(!table.is_live(id));
    }

    #[test]
    fn change_topic_renames_live_channel() {
        let mut table = ChannelTable::new(10);
        let id = table.create("cats").unwrap();
        table.change_topic(id, "dogs");
        assert_eq!(table.find_by_topic("dogs"), Some(id));
        assert_eq!(table.find_by_topic("cats"), None);
    }

    // ── Membership ───────────────────────────────────────────────

    #[test]
    fn join_is_idempotent() {
        let mut table = ChannelTable::new(10);
        table.join(0, 4);
        table.join(0, 4);
        assert_eq!(table.members(0), vec![4]);
    }

    #[test]
    fn leave_preserves_member_order() {
        let mut table = ChannelTable::new(10);
        table.join(0, 4);
        table.join(0, 7);
        table.join(0, 2);
        table.leave(0, 7);
        assert_eq!(table.members(0), vec![4, 2]);
    }

    #[test]
    fn members_of_dead_channel_is_empty() {
        let table = ChannelTable::new(10);
        assert!(table.members(5).is_empty());
    }
}
