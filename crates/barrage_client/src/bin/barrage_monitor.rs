#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use barrage_client::catalog::{DEFAULT_GIFT_API_BASE, HttpGiftCatalog};
use barrage_client::store::SharedStores;
use barrage_client::{EnabledKinds, Options, Session, SessionConfig, SessionState};
use barrage_domain::{EventKey, RoomId};
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: barrage_monitor --room <id> [--url wss://host:port] [--threshold n] [--all]\n\
\n\
Options:\n\
	--room       Room id to ingest (required)\n\
	--url        Gateway endpoint override (default: stock gateway, random port)\n\
	--gift-api   Gift catalog REST base (default: {DEFAULT_GIFT_API_BASE})\n\
	--threshold  Per-list entry cap (default: 100)\n\
	--all        Enable every event list (entrance and gifts are off by default)\n\
	--help       Show this help\n\
\n\
Examples:\n\
	barrage_monitor --room 317422\n\
	barrage_monitor --room 317422 --all --threshold 200\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,barrage_client=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

struct MonitorArgs {
	room: String,
	url: Option<String>,
	gift_api: String,
	threshold: Option<usize>,
	all: bool,
}

fn parse_args() -> MonitorArgs {
	let mut room: Option<String> = None;
	let mut url: Option<String> = None;
	let mut gift_api = DEFAULT_GIFT_API_BASE.to_string();
	let mut threshold: Option<usize> = None;
	let mut all = false;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--room" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--room must be non-empty");
					usage_and_exit();
				}
				room = Some(v);
			}
			"--url" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--url must be non-empty");
					usage_and_exit();
				}
				url = Some(v);
			}
			"--gift-api" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--gift-api must be non-empty");
					usage_and_exit();
				}
				gift_api = v;
			}
			"--threshold" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let parsed: usize = v.parse().unwrap_or_else(|_| {
					eprintln!("Invalid --threshold value: {v}");
					usage_and_exit()
				});
				threshold = Some(parsed);
			}
			"--all" => all = true,
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let Some(room) = room else {
		eprintln!("--room is required");
		usage_and_exit();
	};

	MonitorArgs {
		room,
		url,
		gift_api,
		threshold,
		all,
	}
}

fn log_new_events(stores: &SharedStores, last: &mut Option<EventKey>) {
	let guard = stores.read();
	let floor = *last;
	let fresh = |key: EventKey| floor.map_or(true, |f| key > f);
	let mut newest = floor;
	let mut bump = |key: EventKey| {
		if newest.map_or(true, |n| key > n) {
			newest = Some(key);
		}
	};

	for ev in guard.chat.iter().filter(|e| fresh(e.key)) {
		info!(list = "chat", user = %ev.nickname, level = ev.level, text = %ev.text);
		bump(ev.key);
	}
	for ev in guard.gift.iter().filter(|e| fresh(e.key)) {
		info!(list = "gift", user = %ev.nickname, kind = ?ev.kind);
		bump(ev.key);
	}
	for ev in guard.entrance.iter().filter(|e| fresh(e.key)) {
		info!(list = "entrance", user = %ev.nickname, level = ev.level);
		bump(ev.key);
	}
	for ev in guard.superchat.iter().filter(|e| fresh(e.key)) {
		info!(list = "superchat", user = %ev.nickname, price = ev.price, tier = ev.tier, text = %ev.text);
		bump(ev.key);
	}
	for ev in guard.command.iter().filter(|e| fresh(e.key)) {
		info!(list = "command", user = %ev.nickname, command = %ev.command, args = %ev.args);
		bump(ev.key);
	}

	*last = newest;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let args = parse_args();

	let room: RoomId = args.room.parse().map_err(|e| anyhow::anyhow!("invalid room id: {e}"))?;

	let mut opts = Options::for_room(room.clone());
	if args.all {
		opts.enabled = EnabledKinds::all();
	}
	if let Some(threshold) = args.threshold {
		opts.threshold = threshold;
	}

	let catalog = Arc::new(HttpGiftCatalog::new(args.gift_api));
	if let Err(err) = catalog.refresh(&room).await {
		warn!(error = %err, "gift catalog refresh failed; price rules fail open");
	}

	let cfg = SessionConfig {
		gateway_url: args.url,
		..SessionConfig::default()
	};

	let mut handle = Session::spawn(cfg, opts, catalog);
	let mut tick = tokio::time::interval(Duration::from_millis(500));
	let mut last_key: Option<EventKey> = None;

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!("interrupted; shutting down");
				handle.shutdown().await;
				break;
			}
			changed = handle.state.changed() => {
				if changed.is_err() {
					break;
				}
				let state = *handle.state.borrow_and_update();
				info!(%state, "session state");
				if state == SessionState::Closed {
					break;
				}
			}
			_ = tick.tick() => {
				log_new_events(&handle.stores, &mut last_key);
			}
		}
	}

	log_new_events(&handle.stores, &mut last_key);
	handle.task.await?;
	Ok(())
}
