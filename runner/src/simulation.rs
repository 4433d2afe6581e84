//! The seam between the runner and the match simulation.
//!
//! The simulation owns the match state; the runner hands it the [`Roster`] on
//! every call so it can ask each slot for its intent before computing the tick.

use crate::client::{Client, Observation};
use crate::tcp::TcpClient;
use shared::{Bonus, Intent, Message};
use std::collections::BTreeMap;

/// Operations the tick scheduler drives.
///
/// `current_tick` is the number of the tick the next `advance_tick` will play,
/// starting at 1.
#[allow(async_fn_in_trait)]
pub trait Simulation {
    async fn start_match(&mut self, roster: &mut Roster);

    /// Gathers one intent per slot, computes the tick, reports whether the match ended
    async fn advance_tick(&mut self, roster: &mut Roster) -> bool;

    async fn end_match(&mut self, roster: &mut Roster);

    fn save(&mut self);

    fn current_tick(&self) -> u64;

    /// Replaces the bonuses the simulation would generate for the next tick
    fn replace_bonuses(&mut self, bonuses: Vec<Bonus>);
}

/// One player position, fixed for the match
#[derive(Debug)]
pub struct PlayerSlot {
    pub ordinal: u32,
    pub client: Client,
}

/// All filled slots of a match, ordered by ordinal
#[derive(Debug, Default)]
pub struct Roster {
    slots: Vec<PlayerSlot>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ordinal: u32, client: Client) {
        self.slots.push(PlayerSlot { ordinal, client });
        self.slots.sort_by_key(|slot| slot.ordinal);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ordinals(&self) -> Vec<u32> {
        self.slots.iter().map(|slot| slot.ordinal).collect()
    }

    pub fn slots(&self) -> impl Iterator<Item = &PlayerSlot> {
        self.slots.iter()
    }

    pub fn get(&self, ordinal: u32) -> Option<&Client> {
        self.slots
            .iter()
            .find(|slot| slot.ordinal == ordinal)
            .map(|slot| &slot.client)
    }

    pub fn identities(&self) -> BTreeMap<u32, String> {
        self.slots
            .iter()
            .map(|slot| (slot.ordinal, slot.client.identity().to_string()))
            .collect()
    }

    /// Collects one intent from every slot.
    ///
    /// Observations go out to every external strategy before any reply is
    /// awaited, so they all think at once and the tick waits for the slowest
    /// bounded reply only.
    pub async fn collect_intents<F>(&mut self, mut observe: F) -> BTreeMap<u32, Intent>
    where
        F: FnMut(u32) -> Observation,
    {
        for slot in self.slots.iter_mut() {
            let observation = observe(slot.ordinal);
            slot.client.send_observation(&observation).await;
        }

        let mut intents = BTreeMap::new();
        for slot in self.slots.iter_mut() {
            intents.insert(slot.ordinal, slot.client.receive_intent().await);
        }
        intents
    }

    pub async fn broadcast(&mut self, message: &Message) {
        for slot in self.slots.iter_mut() {
            slot.client.notify(message).await;
        }
    }

    /// Removes the network clients, keyed by ordinal, dropping everything else
    pub fn into_network_clients(self) -> BTreeMap<u32, TcpClient> {
        self.slots
            .into_iter()
            .filter_map(|slot| match slot.client {
                Client::Network(client) => Some((slot.ordinal, client)),
                _ => None,
            })
            .collect()
    }
}
