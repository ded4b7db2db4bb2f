#![forbid(unsafe_code)]

pub mod catalog;
pub mod dispatch;
pub mod filter;
pub mod session;
pub mod store;
pub mod superchat;

use barrage_domain::{EventKey, RoomId};
use serde::{Deserialize, Serialize};

pub use catalog::{GiftCatalog, GiftInfo, HttpGiftCatalog, StaticGiftCatalog};
pub use dispatch::{Dispatcher, MessageKind};
pub use session::{Session, SessionConfig, SessionControl, SessionHandle, SessionState};
pub use store::{EventStore, EventStores, SharedStores};

/// Immutable configuration snapshot supplied by the host application.
///
/// The core never mutates a snapshot; the session accepts replacement
/// snapshots over its control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
	/// Room this session ingests.
	pub room_id: RoomId,

	#[serde(default)]
	pub enabled: EnabledKinds,

	/// Per-store entry cap.
	#[serde(default = "default_threshold")]
	pub threshold: usize,

	#[serde(default)]
	pub chat: ChatRules,

	#[serde(default)]
	pub entrance: EntranceRules,

	#[serde(default)]
	pub gift: GiftRules,

	#[serde(default)]
	pub superchat: SuperchatOptions,

	#[serde(default)]
	pub command: CommandOptions,
}

impl Options {
	/// Default snapshot for a room.
	pub fn for_room(room_id: RoomId) -> Self {
		Self {
			room_id,
			enabled: EnabledKinds::default(),
			threshold: default_threshold(),
			chat: ChatRules::default(),
			entrance: EntranceRules::default(),
			gift: GiftRules::default(),
			superchat: SuperchatOptions::default(),
			command: CommandOptions::default(),
		}
	}
}

fn default_threshold() -> usize {
	100
}

/// Per-kind pipeline toggles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnabledKinds {
	pub chat: bool,
	pub gift: bool,
	pub entrance: bool,
	pub superchat: bool,
	pub command: bool,
}

impl Default for EnabledKinds {
	fn default() -> Self {
		// entrance and gift lists are opt-in
		Self {
			chat: true,
			gift: false,
			entrance: false,
			superchat: true,
			command: true,
		}
	}
}

impl EnabledKinds {
	pub fn all() -> Self {
		Self {
			chat: true,
			gift: true,
			entrance: true,
			superchat: true,
			command: true,
		}
	}
}

/// Chat ban rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRules {
	/// Drop messages whose sender level is at or below this.
	#[serde(default)]
	pub ban_level: u32,

	/// Space-separated substrings banned from message text.
	#[serde(default)]
	pub ban_keywords: String,

	/// Space-separated substrings banned from nicknames.
	#[serde(default)]
	pub ban_nicknames: String,

	/// Drop a message equal to the immediately preceding accepted one.
	#[serde(default)]
	pub filter_repeats: bool,
}

/// Entrance ban rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntranceRules {
	#[serde(default)]
	pub ban_level: u32,
}

/// Gift ban rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftRules {
	/// Drop gifts whose catalog unit price (yuan) is below this.
	#[serde(default)]
	pub min_price: f64,

	/// Space-separated substrings banned from gift names.
	#[serde(default)]
	pub ban_keywords: String,

	/// Minimum fan-badge level worth announcing.
	#[serde(default = "default_min_fan_level")]
	pub min_fan_level: u32,
}

impl Default for GiftRules {
	fn default() -> Self {
		Self {
			min_price: 0.0,
			ban_keywords: String::new(),
			min_fan_level: default_min_fan_level(),
		}
	}
}

fn default_min_fan_level() -> u32 {
	6
}

/// Superchat keyword and tier table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperchatOptions {
	/// Keyword unlocking a superchat for a contributing user.
	#[serde(default = "default_superchat_keyword")]
	pub keyword: String,

	/// Price tiers scanned in order, highest `min_price` first.
	#[serde(default = "SuperchatTierStyle::default_table")]
	pub tiers: Vec<SuperchatTierStyle>,

	/// How long an unconsumed gift contribution stays redeemable.
	#[serde(default = "default_contribution_ttl_secs")]
	pub contribution_ttl_secs: u64,
}

impl SuperchatOptions {
	/// The cheapest configured tier, the entry price for contributions.
	pub fn lowest_tier_price(&self) -> Option<f64> {
		self.tiers.last().map(|t| t.min_price)
	}
}

impl Default for SuperchatOptions {
	fn default() -> Self {
		Self {
			keyword: default_superchat_keyword(),
			tiers: SuperchatTierStyle::default_table(),
			contribution_ttl_secs: default_contribution_ttl_secs(),
		}
	}
}

fn default_superchat_keyword() -> String {
	"#sc".to_string()
}

fn default_contribution_ttl_secs() -> u64 {
	30 * 60
}

/// One row of the superchat color table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperchatTierStyle {
	pub min_price: f64,
	pub header_color: String,
	pub body_color: String,
}

impl SuperchatTierStyle {
	fn row(min_price: f64, header_color: &str, body_color: &str) -> Self {
		Self {
			min_price,
			header_color: header_color.to_string(),
			body_color: body_color.to_string(),
		}
	}

	/// Stock table, highest first.
	pub fn default_table() -> Vec<Self> {
		vec![
			Self::row(1000.0, "rgb(208,0,0)", "rgb(230,33,23)"),
			Self::row(500.0, "rgb(194,24,91)", "rgb(233,30,99)"),
			Self::row(100.0, "rgb(230,81,0)", "rgb(245,124,0)"),
			Self::row(50.0, "rgb(0,191,165)", "rgb(29,233,182)"),
			Self::row(10.0, "rgb(21,101,192)", "rgb(30,136,229)"),
			Self::row(0.0, "rgb(103,58,183)", "rgb(121,85,170)"),
		]
	}
}

/// Operator command configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOptions {
	#[serde(default = "default_command_prefix")]
	pub prefix: String,

	#[serde(default)]
	pub keywords: Vec<CommandKeyword>,
}

impl Default for CommandOptions {
	fn default() -> Self {
		Self {
			prefix: default_command_prefix(),
			keywords: Vec::new(),
		}
	}
}

fn default_command_prefix() -> String {
	"#".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandKeyword {
	pub name: String,
	#[serde(default = "default_true")]
	pub enabled: bool,
}

impl CommandKeyword {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			enabled: true,
		}
	}
}

fn default_true() -> bool {
	true
}

/// Badge and role flags attached to a user as the gateway reports them.
#[derive(Debug, Clone, Default)]
pub struct UserBadges {
	pub fan_badge: Option<FanBadge>,
	pub noble_level: u32,
	pub diamond_fan: bool,
	pub room_admin: bool,
	pub platform_admin: bool,
	pub vip: bool,
}

#[derive(Debug, Clone)]
pub struct FanBadge {
	pub name: String,
	pub level: u32,
}

/// A presentation-ready event, one of five kinds.
#[derive(Debug, Clone)]
pub enum Event {
	Chat(ChatEvent),
	Gift(GiftEvent),
	Entrance(EntranceEvent),
	Superchat(SuperchatEvent),
	Command(CommandEvent),
}

#[derive(Debug, Clone)]
pub struct ChatEvent {
	pub key: EventKey,
	pub user_id: String,
	pub nickname: String,
	pub avatar: String,
	pub level: u32,
	pub text: String,
	/// Gateway color slot; absent for plain messages.
	pub color: Option<u8>,
	pub badges: UserBadges,
}

#[derive(Debug, Clone)]
pub struct GiftEvent {
	pub key: EventKey,
	pub nickname: String,
	pub level: u32,
	pub kind: GiftEventKind,
}

/// Sub-kinds of the gift list.
#[derive(Debug, Clone)]
pub enum GiftEventKind {
	Gift {
		gift_id: String,
		name: Option<String>,
		count: u64,
		combo: u64,
	},
	DiamondFan {
		renewal: bool,
	},
	Noble {
		level: u32,
		renewal: bool,
	},
	FanBadgeLevel {
		level: u32,
	},
}

#[derive(Debug, Clone)]
pub struct EntranceEvent {
	pub key: EventKey,
	pub nickname: String,
	pub avatar: String,
	pub level: u32,
	pub noble_level: u32,
}

#[derive(Debug, Clone)]
pub struct SuperchatEvent {
	pub key: EventKey,
	pub user_id: String,
	pub nickname: String,
	pub avatar: String,
	pub text: String,
	/// Effective price after clamping to zero.
	pub price: f64,
	pub tier: u8,
	pub duration_secs: u64,
	pub header_color: String,
	pub body_color: String,
	pub created_unix_ms: u64,
	/// The only field mutated after creation, by the expiry sweep.
	pub expired: bool,
	pub badges: UserBadges,
}

#[derive(Debug, Clone)]
pub struct CommandEvent {
	pub key: EventKey,
	pub user_id: String,
	pub nickname: String,
	pub level: u32,
	/// Full message text.
	pub text: String,
	/// Matched command keyword.
	pub command: String,
	/// Remainder of the text after prefix and keyword.
	pub args: String,
	pub created_unix_ms: u64,
}
