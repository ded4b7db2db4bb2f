#![forbid(unsafe_code)]

//! Gift catalog collaborator: the dispatcher only ever consumes the
//! price/name lookup; fetching and caching happen off the dispatch path.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use barrage_domain::RoomId;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::info;

/// Catalog entry for one gift id.
#[derive(Debug, Clone)]
pub struct GiftInfo {
	pub name: String,
	/// Unit price in currency subunits (cents).
	pub price_cents: u64,
}

/// Price/name lookup by gift id. Absent means "unknown gift" and filter
/// rules fail open on it.
pub trait GiftCatalog: Send + Sync {
	fn lookup(&self, gift_id: &str) -> Option<GiftInfo>;
}

/// Fixed in-memory catalog for tests and offline runs.
#[derive(Debug, Default)]
pub struct StaticGiftCatalog {
	gifts: HashMap<String, GiftInfo>,
}

impl StaticGiftCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, gift_id: impl Into<String>, name: impl Into<String>, price_cents: u64) {
		self.gifts.insert(
			gift_id.into(),
			GiftInfo {
				name: name.into(),
				price_cents,
			},
		);
	}
}

impl GiftCatalog for StaticGiftCatalog {
	fn lookup(&self, gift_id: &str) -> Option<GiftInfo> {
		self.gifts.get(gift_id).cloned()
	}
}

/// Default REST endpoint of the gateway's gift service.
pub const DEFAULT_GIFT_API_BASE: &str = "https://gift.douyucdn.cn";

/// Minimum spacing between catalog refreshes.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// REST-backed catalog with an in-memory cache. `lookup` is always served
/// from the cache; `refresh` repopulates it and rate-limits itself.
pub struct HttpGiftCatalog {
	base_url: String,
	client: reqwest::Client,
	cache: RwLock<HashMap<String, GiftInfo>>,
	last_refresh: RwLock<Option<Instant>>,
}

impl HttpGiftCatalog {
	pub fn new(base_url: impl Into<String>) -> Self {
		let client = reqwest::Client::builder()
			.user_agent("barrage-monitor/0.1")
			.build()
			.unwrap_or_default();
		Self {
			base_url: base_url.into(),
			client,
			cache: RwLock::new(HashMap::new()),
			last_refresh: RwLock::new(None),
		}
	}

	/// Fetch the room's gift list and replace the cache. Returns the number
	/// of cached gifts; a recent prior refresh short-circuits.
	pub async fn refresh(&self, room_id: &RoomId) -> anyhow::Result<usize> {
		{
			let last = self.last_refresh.read();
			if let Some(at) = *last
				&& at.elapsed() < REFRESH_INTERVAL
				&& !self.cache.read().is_empty()
			{
				return Ok(self.cache.read().len());
			}
		}

		let url = format!(
			"{}/api/gift/v5/web/list?rid={}",
			self.base_url.trim_end_matches('/'),
			room_id.as_str()
		);
		let resp = self.client.get(url).send().await.context("fetch gift list")?;
		if !resp.status().is_success() {
			return Err(anyhow!("gift list fetch failed: status={}", resp.status()));
		}

		let body: GiftListResponse = resp.json().await.context("parse gift list response")?;
		let entries = body.data.map(|d| d.gift_list).unwrap_or_default();

		let mut gifts = HashMap::with_capacity(entries.len());
		for entry in entries {
			gifts.insert(
				entry.id.to_string(),
				GiftInfo {
					name: entry.name,
					price_cents: entry.price,
				},
			);
		}

		let count = gifts.len();
		*self.cache.write() = gifts;
		*self.last_refresh.write() = Some(Instant::now());
		info!(room = %room_id, gifts = count, "gift catalog refreshed");
		Ok(count)
	}
}

impl GiftCatalog for HttpGiftCatalog {
	fn lookup(&self, gift_id: &str) -> Option<GiftInfo> {
		self.cache.read().get(gift_id).cloned()
	}
}

#[derive(Debug, Deserialize)]
struct GiftListResponse {
	data: Option<GiftListData>,
}

#[derive(Debug, Deserialize)]
struct GiftListData {
	#[serde(default, rename = "giftList")]
	gift_list: Vec<GiftEntry>,
}

#[derive(Debug, Deserialize)]
struct GiftEntry {
	id: u64,
	#[serde(default, alias = "n")]
	name: String,
	#[serde(default, alias = "pc")]
	price: u64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn static_catalog_lookup() {
		let mut catalog = StaticGiftCatalog::new();
		catalog.insert("824", "fish ball", 100);

		let info = catalog.lookup("824").expect("known gift");
		assert_eq!(info.name, "fish ball");
		assert_eq!(info.price_cents, 100);
		assert!(catalog.lookup("999").is_none());
	}

	#[test]
	fn gift_list_response_accepts_short_field_names() {
		let json = r#"{"data":{"giftList":[
			{"id":824,"n":"fish ball","pc":100},
			{"id":192,"name":"rocket","price":50000}
		]}}"#;
		let body: GiftListResponse = serde_json::from_str(json).expect("parse");
		let entries = body.data.expect("data").gift_list;
		assert_eq!(entries.len(), 2);
		assert_eq!(entries[0].name, "fish ball");
		assert_eq!(entries[0].price, 100);
		assert_eq!(entries[1].name, "rocket");
		assert_eq!(entries[1].price, 50000);
	}
}
