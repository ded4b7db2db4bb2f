#![forbid(unsafe_code)]

//! Bounded, ordered event collections backing the presentation lists.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{ChatEvent, CommandEvent, EntranceEvent, GiftEvent, SuperchatEvent};

/// An ordered collection capped at `threshold` entries; pushing beyond
/// capacity evicts the oldest entry. Insertion never fails.
#[derive(Debug, Clone)]
pub struct EventStore<T> {
	items: VecDeque<T>,
	threshold: usize,
}

impl<T> EventStore<T> {
	pub fn new(threshold: usize) -> Self {
		Self {
			items: VecDeque::with_capacity(threshold.min(1024)),
			threshold,
		}
	}

	pub fn push(&mut self, item: T) {
		self.items.push_back(item);
		while self.items.len() > self.threshold {
			self.items.pop_front();
		}
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn threshold(&self) -> usize {
		self.threshold
	}

	/// Change the cap; excess oldest entries are evicted immediately.
	pub fn set_threshold(&mut self, threshold: usize) {
		self.threshold = threshold;
		while self.items.len() > self.threshold {
			self.items.pop_front();
		}
	}

	pub fn latest(&self) -> Option<&T> {
		self.items.back()
	}

	pub fn iter(&self) -> impl Iterator<Item = &T> {
		self.items.iter()
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
		self.items.iter_mut()
	}
}

impl<T: Clone> EventStore<T> {
	/// Copy out the current contents, oldest first.
	pub fn snapshot(&self) -> Vec<T> {
		self.items.iter().cloned().collect()
	}
}

/// The five per-kind stores of one session.
#[derive(Debug)]
pub struct EventStores {
	pub chat: EventStore<ChatEvent>,
	pub gift: EventStore<GiftEvent>,
	pub entrance: EventStore<EntranceEvent>,
	pub superchat: EventStore<SuperchatEvent>,
	pub command: EventStore<CommandEvent>,
}

impl EventStores {
	pub fn new(threshold: usize) -> Self {
		Self {
			chat: EventStore::new(threshold),
			gift: EventStore::new(threshold),
			entrance: EventStore::new(threshold),
			superchat: EventStore::new(threshold),
			command: EventStore::new(threshold),
		}
	}

	pub fn set_threshold(&mut self, threshold: usize) {
		self.chat.set_threshold(threshold);
		self.gift.set_threshold(threshold);
		self.entrance.set_threshold(threshold);
		self.superchat.set_threshold(threshold);
		self.command.set_threshold(threshold);
	}
}

/// Shared handle the dispatcher writes and the presentation side reads.
pub type SharedStores = Arc<RwLock<EventStores>>;

/// Build the shared store handle for one session.
pub fn shared_stores(threshold: usize) -> SharedStores {
	Arc::new(RwLock::new(EventStores::new(threshold)))
}
