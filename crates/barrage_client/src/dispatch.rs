#![forbid(unsafe_code)]

//! Message-type dispatch: classify a decoded record, apply filter rules and
//! publish the surviving events into the bounded stores.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use barrage_domain::EventKey;
use barrage_protocol::stt::{self, Record};
use tracing::debug;

use crate::catalog::GiftCatalog;
use crate::store::SharedStores;
use crate::superchat::{self, ContributionLedger};
use crate::{
	ChatEvent, CommandEvent, EntranceEvent, FanBadge, GiftEvent, GiftEventKind, Options, SuperchatEvent, UserBadges, filter,
};

/// Default eviction window for the dedup set.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Closed set of known wire message kinds.
///
/// The gateway tags records with a string `type` (shadowed by `btype` on
/// wrapped broadcasts); everything not listed here is dropped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
	Chat,
	Gift,
	DiamondFanOpen,
	DiamondFanRenew,
	NobleOpen,
	NobleRenew,
	FanBadgeLevel,
	FanBadgeBroadcast,
	Entrance,
	Superchat,
	FanPaper,
	ProfessionalGift,
	VoiceMessage,
}

impl MessageKind {
	pub fn from_tag(tag: &str) -> Option<Self> {
		match tag {
			"chatmsg" => Some(Self::Chat),
			"dgb" => Some(Self::Gift),
			"odfbc" => Some(Self::DiamondFanOpen),
			"rndfbc" => Some(Self::DiamondFanRenew),
			"anbc" => Some(Self::NobleOpen),
			"rnewbc" => Some(Self::NobleRenew),
			"blab" => Some(Self::FanBadgeLevel),
			"fansupgradebroadcast" => Some(Self::FanBadgeBroadcast),
			"uenter" => Some(Self::Entrance),
			"sc" | "superchat" => Some(Self::Superchat),
			"fansPaper" => Some(Self::FanPaper),
			"professgiftsrc" => Some(Self::ProfessionalGift),
			"voiceDanmu" => Some(Self::VoiceMessage),
			_ => None,
		}
	}

	/// Classify a record: `btype` wins over `type` when both are present
	/// (wrapped broadcasts carry their real kind in `btype`).
	pub fn from_record(rec: &Record) -> Option<Self> {
		let tag = rec
			.get_str("btype")
			.filter(|t| !t.is_empty())
			.or_else(|| rec.get_str("type"))?;
		Self::from_tag(tag)
	}
}

/// Dedup set over message ids with time-windowed eviction.
#[derive(Debug)]
struct SeenIds {
	set: HashSet<String>,
	order: VecDeque<(Instant, String)>,
	window: Duration,
}

impl SeenIds {
	fn new(window: Duration) -> Self {
		Self {
			set: HashSet::new(),
			order: VecDeque::new(),
			window,
		}
	}

	/// Record an id; false when it was already present.
	fn insert(&mut self, id: &str, now: Instant) -> bool {
		self.prune(now);
		if !self.set.insert(id.to_string()) {
			return false;
		}
		self.order.push_back((now, id.to_string()));
		true
	}

	fn prune(&mut self, now: Instant) {
		while let Some((seen_at, _)) = self.order.front() {
			if now.duration_since(*seen_at) <= self.window {
				break;
			}
			if let Some((_, id)) = self.order.pop_front() {
				self.set.remove(&id);
			}
		}
	}

	fn len(&self) -> usize {
		self.set.len()
	}
}

fn field_u32(rec: &Record, key: &str) -> Option<u32> {
	rec.get_str(key).and_then(|v| v.trim().parse().ok())
}

fn field_u64(rec: &Record, key: &str) -> Option<u64> {
	rec.get_str(key).and_then(|v| v.trim().parse().ok())
}

fn field_f64(rec: &Record, key: &str) -> Option<f64> {
	rec.get_str(key).and_then(|v| v.trim().parse().ok())
}

fn unix_now_ms() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or(0)
}

/// Classifies decoded records and maintains the per-room pipeline state:
/// dedup set, contribution ledger, repeat-suppression memory and the shared
/// stores. One dispatcher per session; nothing is shared across rooms.
pub struct Dispatcher {
	opts: Options,
	stores: SharedStores,
	seen: SeenIds,
	contributions: ContributionLedger,
	last_chat_text: Option<String>,
}

impl Dispatcher {
	pub fn new(opts: Options, stores: SharedStores, dedup_window: Duration) -> Self {
		let ttl = Duration::from_secs(opts.superchat.contribution_ttl_secs);
		Self {
			opts,
			stores,
			seen: SeenIds::new(dedup_window),
			contributions: ContributionLedger::new(ttl),
			last_chat_text: None,
		}
	}

	/// Replace the configuration snapshot.
	pub fn update_options(&mut self, opts: Options) {
		self.contributions
			.set_ttl(Duration::from_secs(opts.superchat.contribution_ttl_secs));
		self.stores.write().set_threshold(opts.threshold);
		self.opts = opts;
	}

	pub fn options(&self) -> &Options {
		&self.opts
	}

	/// Decode one frame string and dispatch it.
	pub fn dispatch_frame(&mut self, frame: &str, catalog: &dyn GiftCatalog, now: Instant) {
		let rec = stt::decode_record(frame);
		if rec.is_empty() {
			metrics::counter!("barrage_frames_undecodable_total").increment(1);
			return;
		}
		self.dispatch_record(&rec, catalog, now);
	}

	/// Dispatch a decoded record: dedup, classify, filter, publish.
	pub fn dispatch_record(&mut self, rec: &Record, catalog: &dyn GiftCatalog, now: Instant) {
		let id = message_id(rec);
		if !self.seen.insert(&id, now) {
			metrics::counter!("barrage_records_deduped_total").increment(1);
			debug!(%id, "duplicate record dropped");
			return;
		}

		let Some(kind) = MessageKind::from_record(rec) else {
			metrics::counter!("barrage_records_unknown_kind_total").increment(1);
			return;
		};

		match kind {
			MessageKind::Chat => self.on_chat(rec, now),
			MessageKind::Gift => self.on_gift(rec, catalog, now),
			MessageKind::DiamondFanOpen => self.on_diamond_fan(rec, false),
			MessageKind::DiamondFanRenew => self.on_diamond_fan(rec, true),
			MessageKind::NobleOpen => self.on_noble(rec, false),
			MessageKind::NobleRenew => self.on_noble(rec, true),
			MessageKind::FanBadgeLevel => self.on_fan_badge(rec, "bl", "nn"),
			MessageKind::FanBadgeBroadcast => self.on_fan_badge(rec, "otherContent", "userName"),
			MessageKind::Entrance => self.on_entrance(rec),
			MessageKind::Superchat => {
				let price = field_f64(rec, "price").or_else(|| field_f64(rec, "cost")).unwrap_or(10.0);
				self.on_native_superchat(rec, price);
			}
			MessageKind::FanPaper => {
				// fan-badge announcements carry a text level used as a
				// negative tier
				let price = field_f64(rec, "textLevel").unwrap_or(-1.0);
				self.on_native_superchat(rec, price);
			}
			MessageKind::ProfessionalGift => self.on_native_superchat(rec, -3.0),
			MessageKind::VoiceMessage => {
				let price = field_f64(rec, "crealPrice")
					.or_else(|| field_f64(rec, "cprice"))
					.map(|subunits| subunits / 100.0)
					.unwrap_or(10.0);
				self.on_native_superchat(rec, price);
			}
		}
	}

	/// Prune time-based state and refresh superchat expiry flags.
	pub fn sweep(&mut self, now: Instant) {
		self.seen.prune(now);
		self.contributions.prune(now);
		superchat::sweep_expired(&mut self.stores.write().superchat, unix_now_ms());
	}

	/// Number of ids currently held for dedup (observability only).
	pub fn seen_len(&self) -> usize {
		self.seen.len()
	}

	fn on_chat(&mut self, rec: &Record, now: Instant) {
		if !self.opts.enabled.chat {
			return;
		}

		let level = field_u32(rec, "level");
		let text = rec.get_str("txt").unwrap_or("");
		let nickname = rec.get_str("nn").unwrap_or("");

		if !filter::chat_allowed(&self.opts.chat, level, text, nickname, self.last_chat_text.as_deref()) {
			metrics::counter!("barrage_records_filtered_total", "kind" => "chat").increment(1);
			return;
		}

		let user_id = rec.get_str("uid").unwrap_or("");

		// a keyword message from a contributing user upgrades to a superchat
		// instead of a plain chat entry
		if self.opts.enabled.superchat
			&& !self.opts.superchat.keyword.is_empty()
			&& text.contains(&self.opts.superchat.keyword)
			&& let Some(contribution) = self.contributions.take(user_id, now)
		{
			let event = self.build_superchat(rec, None, text, contribution.price);
			self.stores.write().superchat.push(event);
			return;
		}

		let event = ChatEvent {
			key: EventKey::now(),
			user_id: user_id.to_string(),
			nickname: nickname.to_string(),
			avatar: rec.get_str("ic").unwrap_or("").to_string(),
			level: level.unwrap_or(0),
			text: text.to_string(),
			color: field_u32(rec, "col").and_then(|c| u8::try_from(c).ok()),
			badges: badges_from(rec),
		};

		self.last_chat_text = Some(text.to_string());

		let mut stores = self.stores.write();
		stores.chat.push(event);

		if self.opts.enabled.command
			&& let Some((command, args)) = filter::match_command(&self.opts.command, text)
		{
			stores.command.push(CommandEvent {
				key: EventKey::now(),
				user_id: user_id.to_string(),
				nickname: nickname.to_string(),
				level: level.unwrap_or(0),
				text: text.to_string(),
				command,
				args,
				created_unix_ms: unix_now_ms(),
			});
		}
	}

	fn on_gift(&mut self, rec: &Record, catalog: &dyn GiftCatalog, now: Instant) {
		if !self.opts.enabled.gift {
			return;
		}

		let gift_id = rec.get_str("gfid").unwrap_or("");
		let info = catalog.lookup(gift_id);

		if !filter::gift_allowed(&self.opts.gift, info.as_ref()) {
			metrics::counter!("barrage_records_filtered_total", "kind" => "gift").increment(1);
			return;
		}

		let count = field_u64(rec, "gfcnt").unwrap_or(1);
		let event = GiftEvent {
			key: EventKey::now(),
			nickname: rec.get_str("nn").unwrap_or("").to_string(),
			level: field_u32(rec, "level").unwrap_or(0),
			kind: GiftEventKind::Gift {
				gift_id: gift_id.to_string(),
				name: info.as_ref().map(|i| i.name.clone()),
				count,
				combo: field_u64(rec, "hits").unwrap_or(1),
			},
		};
		self.stores.write().gift.push(event);

		// a gift worth the cheapest superchat tier banks a contribution
		if self.opts.enabled.superchat
			&& let Some(info) = info
			&& let Some(entry_price) = self.opts.superchat.lowest_tier_price()
		{
			let total_yuan = count as f64 * info.price_cents as f64 / 100.0;
			if total_yuan >= entry_price {
				let user_id = rec.get_str("uid").unwrap_or("");
				self.contributions.record(user_id, total_yuan, now);
			}
		}
	}

	fn on_diamond_fan(&mut self, rec: &Record, renewal: bool) {
		if !self.opts.enabled.gift {
			return;
		}

		let event = GiftEvent {
			key: EventKey::now(),
			nickname: rec.get_str("nick").unwrap_or("").to_string(),
			level: field_u32(rec, "level").unwrap_or(0),
			kind: GiftEventKind::DiamondFan { renewal },
		};
		self.stores.write().gift.push(event);
	}

	fn on_noble(&mut self, rec: &Record, renewal: bool) {
		if !self.opts.enabled.gift {
			return;
		}
		// noble broadcasts are network-wide; keep only our room's
		if rec.get_str("drid") != Some(self.opts.room_id.as_str()) {
			return;
		}

		let event = GiftEvent {
			key: EventKey::now(),
			nickname: rec.get_str("unk").unwrap_or("").to_string(),
			level: field_u32(rec, "nl").unwrap_or(0),
			kind: GiftEventKind::Noble {
				level: field_u32(rec, "nl").unwrap_or(0),
				renewal,
			},
		};
		self.stores.write().gift.push(event);
	}

	fn on_fan_badge(&mut self, rec: &Record, level_key: &str, nickname_key: &str) {
		if !self.opts.enabled.gift {
			return;
		}
		if rec.get_str("rid") != Some(self.opts.room_id.as_str()) {
			return;
		}

		let level = field_u32(rec, level_key);
		if let Some(level) = level
			&& !filter::fan_level_allowed(&self.opts.gift, level)
		{
			metrics::counter!("barrage_records_filtered_total", "kind" => "fan_badge").increment(1);
			return;
		}

		let event = GiftEvent {
			key: EventKey::now(),
			nickname: rec.get_str(nickname_key).unwrap_or("").to_string(),
			level: field_u32(rec, "level").unwrap_or(0),
			kind: GiftEventKind::FanBadgeLevel {
				level: level.unwrap_or(0),
			},
		};
		self.stores.write().gift.push(event);
	}

	fn on_entrance(&mut self, rec: &Record) {
		if !self.opts.enabled.entrance {
			return;
		}

		let level = field_u32(rec, "level");
		if !filter::entrance_allowed(&self.opts.entrance, level) {
			metrics::counter!("barrage_records_filtered_total", "kind" => "entrance").increment(1);
			return;
		}

		let event = EntranceEvent {
			key: EventKey::now(),
			nickname: rec.get_str("nn").unwrap_or("").to_string(),
			avatar: rec.get_str("ic").unwrap_or("").to_string(),
			level: level.unwrap_or(0),
			noble_level: field_u32(rec, "nl").unwrap_or(0),
		};
		self.stores.write().entrance.push(event);
	}

	fn on_native_superchat(&mut self, rec: &Record, price: f64) {
		if !self.opts.enabled.superchat {
			return;
		}

		// wrapped kinds carry the real user/content in a nested sub-record
		let chatmsg = rec.get_record("chatmsg");
		let text = chatmsg
			.and_then(|c| c.get_str("txt"))
			.or_else(|| rec.get_str("txt"))
			.or_else(|| rec.get_str("msg"))
			.unwrap_or("");

		let event = self.build_superchat(rec, chatmsg, text, price);
		self.stores.write().superchat.push(event);
	}

	fn build_superchat(&self, rec: &Record, chatmsg: Option<&Record>, text: &str, price: f64) -> SuperchatEvent {
		let price = if price.is_finite() { price.max(0.0) } else { 0.0 };

		let nested = |key: &str| chatmsg.and_then(|c| c.get_str(key));
		let nickname = nested("nn")
			.or_else(|| rec.get_str("nn"))
			.or_else(|| rec.get_str("nick"))
			.or_else(|| rec.get_str("userName"))
			.or_else(|| rec.get_str("unk"))
			.unwrap_or("anonymous");
		let avatar = nested("ic")
			.or_else(|| rec.get_str("ic"))
			.or_else(|| rec.get_str("icon"))
			.or_else(|| rec.get_str("uic"))
			.or_else(|| rec.get_str("avatar"))
			.unwrap_or("");
		let user_id = nested("uid").or_else(|| rec.get_str("uid")).unwrap_or("");

		let badge_source = chatmsg.unwrap_or(rec);
		let (header_color, body_color) = superchat::pick_colors(&self.opts.superchat.tiers, price);

		SuperchatEvent {
			key: EventKey::now(),
			user_id: user_id.to_string(),
			nickname: nickname.to_string(),
			avatar: avatar.to_string(),
			text: text.to_string(),
			price,
			tier: superchat::price_to_tier(price),
			duration_secs: superchat::price_to_duration_secs(price),
			header_color,
			body_color,
			created_unix_ms: unix_now_ms(),
			expired: false,
			badges: badges_from(badge_source),
		}
	}
}

/// Dedup id: first present of the candidate id fields, else synthesized from
/// the clock.
fn message_id(rec: &Record) -> String {
	for key in ["cid", "vrid", "now"] {
		if let Some(id) = rec.get_str(key)
			&& !id.is_empty()
		{
			return id.to_string();
		}
	}
	unix_now_ms().to_string()
}

fn badges_from(rec: &Record) -> UserBadges {
	let fan_badge = match (rec.get_str("bnn"), field_u32(rec, "bl")) {
		(Some(name), Some(level)) if !name.is_empty() => Some(FanBadge {
			name: name.to_string(),
			level,
		}),
		_ => None,
	};

	UserBadges {
		fan_badge,
		noble_level: field_u32(rec, "nl").unwrap_or(0),
		diamond_fan: field_u32(rec, "diaf") == Some(1),
		room_admin: field_u32(rec, "rg") == Some(4),
		platform_admin: field_u32(rec, "pg") == Some(5),
		vip: matches!(rec.get_str("ail"), Some("453/") | Some("454/")),
	}
}
