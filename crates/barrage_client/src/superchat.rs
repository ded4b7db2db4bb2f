#![forbid(unsafe_code)]

//! Superchat tiering, gift-contribution tracking and the expiry sweep.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::store::EventStore;
use crate::{SuperchatEvent, SuperchatTierStyle};

/// Colors used when the configured table has no matching row.
pub const FALLBACK_HEADER_COLOR: &str = "rgb(21,101,192)";
pub const FALLBACK_BODY_COLOR: &str = "rgb(30,136,229)";

/// Severity tier for a price in yuan. Monotone; anything below 30 (including
/// negative announcement tiers) lands in tier 1.
pub fn price_to_tier(price: f64) -> u8 {
	if price >= 1000.0 {
		6
	} else if price >= 500.0 {
		5
	} else if price >= 100.0 {
		4
	} else if price >= 50.0 {
		3
	} else if price >= 30.0 {
		2
	} else {
		1
	}
}

/// On-screen lifetime for a price in yuan.
pub fn price_to_duration_secs(price: f64) -> u64 {
	if price >= 500.0 {
		300
	} else if price >= 50.0 {
		120
	} else {
		60
	}
}

/// Pick header/body colors from the table, scanning in order (highest
/// `min_price` first). The price is clamped to zero before the lookup.
pub fn pick_colors(tiers: &[SuperchatTierStyle], price: f64) -> (String, String) {
	let price = price.max(0.0);
	for tier in tiers {
		if price >= tier.min_price {
			return (tier.header_color.clone(), tier.body_color.clone());
		}
	}
	(FALLBACK_HEADER_COLOR.to_string(), FALLBACK_BODY_COLOR.to_string())
}

/// Pending gift value attributed to a user, awaiting a keyword chat.
#[derive(Debug, Clone)]
pub struct Contribution {
	pub count: u32,
	pub price: f64,
	recorded_at: Instant,
}

/// Per-user contribution map with TTL-based expiry.
#[derive(Debug)]
pub struct ContributionLedger {
	entries: HashMap<String, Contribution>,
	ttl: Duration,
}

impl ContributionLedger {
	pub fn new(ttl: Duration) -> Self {
		Self {
			entries: HashMap::new(),
			ttl,
		}
	}

	pub fn set_ttl(&mut self, ttl: Duration) {
		self.ttl = ttl;
	}

	/// Record (or replace) the contribution for a user.
	pub fn record(&mut self, user_id: &str, price: f64, now: Instant) {
		self.entries.insert(
			user_id.to_string(),
			Contribution {
				count: 1,
				price,
				recorded_at: now,
			},
		);
	}

	/// Consume the contribution for a user, if one is live.
	pub fn take(&mut self, user_id: &str, now: Instant) -> Option<Contribution> {
		let contribution = self.entries.remove(user_id)?;
		if now.duration_since(contribution.recorded_at) > self.ttl {
			return None;
		}
		Some(contribution)
	}

	/// Drop entries past their TTL.
	pub fn prune(&mut self, now: Instant) {
		let ttl = self.ttl;
		self.entries.retain(|_, c| now.duration_since(c.recorded_at) <= ttl);
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

/// Recompute the `expired` flag for every live superchat in the store.
///
/// This is the only mutation a superchat sees after creation. Returns how
/// many entries are currently expired.
pub fn sweep_expired(store: &mut EventStore<SuperchatEvent>, now_unix_ms: u64) -> usize {
	let mut expired = 0;
	for item in store.iter_mut() {
		item.expired = now_unix_ms > item.created_unix_ms + item.duration_secs * 1000;
		if item.expired {
			expired += 1;
		}
	}
	expired
}
