#![forbid(unsafe_code)]

//! Connection lifecycle for one room: connect, join, heartbeat, reconnect
//! with backoff, and the frame pump into the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use barrage_protocol::{framing, stt};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval_at, sleep_until};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::Options;
use crate::catalog::GiftCatalog;
use crate::dispatch::{DEFAULT_DEDUP_WINDOW, Dispatcher};
use crate::store::{SharedStores, shared_stores};

pub type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Barrage gateway host; the load balancer answers on ports 8502..=8504.
pub const DEFAULT_GATEWAY_HOST: &str = "wss://danmuproxy.douyu.com";

/// Connection state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Disconnected,
	Connecting,
	Connected,
	Reconnecting,
	/// Terminal: reconnect attempts exhausted, caller action required.
	Closed,
}

impl SessionState {
	pub const fn as_str(self) -> &'static str {
		match self {
			SessionState::Disconnected => "disconnected",
			SessionState::Connecting => "connecting",
			SessionState::Connected => "connected",
			SessionState::Reconnecting => "reconnecting",
			SessionState::Closed => "closed",
		}
	}
}

impl std::fmt::Display for SessionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Host → session control messages.
#[derive(Debug)]
pub enum SessionControl {
	/// Replace the configuration snapshot.
	UpdateOptions(Box<Options>),

	/// Host moved to/from background; shortens the heartbeat while
	/// backgrounded so the transport is less likely to silently drop.
	SetBackground(bool),

	/// Tear down: stop timers, close the socket once, end the task.
	Shutdown,
}

/// Transport and pipeline tuning for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// Full endpoint override; `None` means the stock gateway with a random
	/// load-balancer port.
	pub gateway_url: Option<String>,

	pub heartbeat_interval: Duration,
	pub background_heartbeat_interval: Duration,

	pub reconnect_base: Duration,
	pub reconnect_cap: Duration,
	pub max_reconnect_attempts: u32,

	pub dedup_window: Duration,
	pub sweep_interval: Duration,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			gateway_url: None,
			heartbeat_interval: Duration::from_secs(40),
			background_heartbeat_interval: Duration::from_secs(20),
			reconnect_base: Duration::from_secs(1),
			reconnect_cap: Duration::from_secs(60),
			max_reconnect_attempts: 50,
			dedup_window: DEFAULT_DEDUP_WINDOW,
			sweep_interval: Duration::from_secs(1),
		}
	}
}

/// Handle returned by [`Session::spawn`].
pub struct SessionHandle {
	pub control: mpsc::Sender<SessionControl>,
	pub stores: SharedStores,
	pub state: watch::Receiver<SessionState>,
	pub task: tokio::task::JoinHandle<()>,
}

impl SessionHandle {
	/// Request a graceful teardown; safe to call more than once.
	pub async fn shutdown(&self) {
		let _ = self.control.send(SessionControl::Shutdown).await;
	}
}

/// One gateway connection for one room. Owns the socket, the timers and the
/// dispatcher; nothing is shared across sessions.
pub struct Session {
	cfg: SessionConfig,
	opts: Options,
	catalog: Arc<dyn GiftCatalog>,
	session_id: String,
}

/// Generate an opaque session id for log correlation.
pub fn new_session_id() -> String {
	uuid::Uuid::new_v4().to_string()
}

enum Teardown {
	Shutdown,
	Reconnect,
}

impl Session {
	pub fn new(cfg: SessionConfig, opts: Options, catalog: Arc<dyn GiftCatalog>) -> Self {
		Self {
			cfg,
			opts,
			catalog,
			session_id: new_session_id(),
		}
	}

	/// Spawn the session task and return its handle.
	pub fn spawn(cfg: SessionConfig, opts: Options, catalog: Arc<dyn GiftCatalog>) -> SessionHandle {
		let stores = shared_stores(opts.threshold);
		let (control_tx, control_rx) = mpsc::channel(32);
		let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

		let session = Session::new(cfg, opts, catalog);
		let task_stores = stores.clone();
		let task = tokio::spawn(async move {
			session.run(task_stores, state_tx, control_rx).await;
		});

		SessionHandle {
			control: control_tx,
			stores,
			state: state_rx,
			task,
		}
	}

	/// Drive the session until shutdown or retry exhaustion.
	pub async fn run(
		mut self,
		stores: SharedStores,
		state_tx: watch::Sender<SessionState>,
		mut control_rx: mpsc::Receiver<SessionControl>,
	) {
		let mut dispatcher = Dispatcher::new(self.opts.clone(), stores, self.cfg.dedup_window);
		let mut attempt: u32 = 0;
		let mut background = false;
		let room = self.opts.room_id.clone();
		info!(%room, session_id = %self.session_id, "session starting");

		'outer: loop {
			if attempt >= self.cfg.max_reconnect_attempts {
				warn!(%room, attempt, "reconnect attempts exhausted; closing session");
				state_tx.send_replace(SessionState::Closed);
				return;
			}

			if attempt > 0 {
				let delay = backoff_delay(attempt, self.cfg.reconnect_base, self.cfg.reconnect_cap);
				state_tx.send_replace(SessionState::Reconnecting);
				info!(%room, attempt, ?delay, "reconnecting");
				metrics::counter!("barrage_reconnects_total").increment(1);

				let deadline = Instant::now() + delay;
				loop {
					tokio::select! {
						_ = sleep_until(deadline) => break,
						cmd = control_rx.recv() => {
							match cmd {
								None | Some(SessionControl::Shutdown) => {
									state_tx.send_replace(SessionState::Disconnected);
									return;
								}
								Some(SessionControl::UpdateOptions(opts)) => {
									self.opts = *opts;
									dispatcher.update_options(self.opts.clone());
								}
								Some(SessionControl::SetBackground(flag)) => background = flag,
							}
						}
					}
				}
			}

			state_tx.send_replace(SessionState::Connecting);
			let url = self.gateway_url();
			debug!(%room, %url, "connecting to gateway");

			let mut ws = match tokio_tungstenite::connect_async(url.as_str()).await {
				Ok((ws, _resp)) => ws,
				Err(err) => {
					warn!(%room, error = %err, "gateway connect failed");
					attempt = attempt.saturating_add(1);
					continue;
				}
			};

			if let Err(err) = join_room(&mut ws, room.as_str()).await {
				warn!(%room, error = %err, "room join failed");
				attempt = attempt.saturating_add(1);
				continue;
			}

			state_tx.send_replace(SessionState::Connected);
			info!(%room, "connected");
			attempt = 0;

			match self
				.pump(&mut ws, &mut dispatcher, &mut control_rx, &mut background)
				.await
			{
				Teardown::Shutdown => {
					let _ = ws.close(None).await;
					state_tx.send_replace(SessionState::Disconnected);
					break 'outer;
				}
				Teardown::Reconnect => {
					attempt = attempt.saturating_add(1);
				}
			}
		}
	}

	/// Inner loop while connected: frames, heartbeat, watchdog, sweep.
	async fn pump(
		&mut self,
		ws: &mut WsStream,
		dispatcher: &mut Dispatcher,
		control_rx: &mut mpsc::Receiver<SessionControl>,
		background: &mut bool,
	) -> Teardown {
		let room = self.opts.room_id.clone();

		let mut hb_period = self.heartbeat_period(*background);
		let mut heartbeat = interval_at(Instant::now() + hb_period, hb_period);
		let mut sweep = interval_at(Instant::now() + self.cfg.sweep_interval, self.cfg.sweep_interval);
		let mut last_activity = Instant::now();

		loop {
			tokio::select! {
				cmd = control_rx.recv() => {
					match cmd {
						None | Some(SessionControl::Shutdown) => return Teardown::Shutdown,
						Some(SessionControl::UpdateOptions(opts)) => {
							self.opts = *opts;
							dispatcher.update_options(self.opts.clone());
						}
						Some(SessionControl::SetBackground(flag)) => {
							*background = flag;
							hb_period = self.heartbeat_period(*background);
							heartbeat = interval_at(Instant::now() + hb_period, hb_period);
							debug!(%room, background = flag, ?hb_period, "heartbeat period adjusted");
						}
					}
				}

				msg = ws.next() => {
					let Some(msg) = msg else {
						warn!(%room, "gateway stream ended");
						return Teardown::Reconnect;
					};
					let msg = match msg {
						Ok(msg) => msg,
						Err(err) => {
							warn!(%room, error = %err, "gateway read error");
							return Teardown::Reconnect;
						}
					};

					match msg {
						Message::Binary(blob) => {
							last_activity = Instant::now();
							self.ingest_blob(&blob, dispatcher);
						}
						Message::Text(text) => {
							last_activity = Instant::now();
							self.ingest_blob(text.as_bytes(), dispatcher);
						}
						Message::Ping(payload) => {
							last_activity = Instant::now();
							let _ = ws.send(Message::Pong(payload)).await;
						}
						Message::Pong(_) => {
							last_activity = Instant::now();
						}
						Message::Close(frame) => {
							info!(%room, ?frame, "gateway closed the connection");
							return Teardown::Reconnect;
						}
						_ => {}
					}
				}

				_ = heartbeat.tick() => {
					if last_activity.elapsed() >= hb_period * 2 {
						warn!(%room, "heartbeat watchdog: no inbound traffic, reconnecting");
						return Teardown::Reconnect;
					}

					let frame = match keepalive_frame() {
						Ok(frame) => frame,
						Err(err) => {
							warn!(%room, error = %err, "keepalive encode failed");
							return Teardown::Reconnect;
						}
					};
					if let Err(err) = ws.send(Message::Binary(frame.into())).await {
						warn!(%room, error = %err, "keepalive send failed");
						return Teardown::Reconnect;
					}
				}

				_ = sweep.tick() => {
					dispatcher.sweep(std::time::Instant::now());
				}
			}
		}
	}

	fn ingest_blob(&self, blob: &[u8], dispatcher: &mut Dispatcher) {
		let frames = framing::split_frames(blob);
		metrics::counter!("barrage_frames_total").increment(frames.len() as u64);
		for frame in frames {
			dispatcher.dispatch_frame(&frame, self.catalog.as_ref(), std::time::Instant::now());
		}
	}

	fn heartbeat_period(&self, background: bool) -> Duration {
		if background {
			self.cfg.background_heartbeat_interval
		} else {
			self.cfg.heartbeat_interval
		}
	}

	fn gateway_url(&self) -> String {
		match &self.cfg.gateway_url {
			Some(url) => url.clone(),
			None => {
				// the gateway load-balances over 8502..=8504
				let port: u32 = rand::rng().random_range(8502..8505);
				format!("{DEFAULT_GATEWAY_HOST}:{port}")
			}
		}
	}
}

/// Exponential backoff with jitter: `min(base * 2^(attempt-1), cap)` plus a
/// uniform jitter below one second.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
	let pow = attempt.saturating_sub(1).min(16);
	let ms = base.as_millis().saturating_mul(1u128 << pow);
	let capped = Duration::from_millis(ms.min(u64::MAX as u128) as u64).min(cap).max(base);
	let jitter = rand::rng().random_range(0..1000u64);
	capped + Duration::from_millis(jitter)
}

/// Send the guest login and room-group join frames.
async fn join_room(ws: &mut WsStream, room_id: &str) -> anyhow::Result<()> {
	let login = control_frame(&[("type", "loginreq"), ("roomid", room_id)])?;
	let join = control_frame(&[("type", "joingroup"), ("rid", room_id), ("gid", "-9999")])?;

	ws.send(Message::Binary(login.into())).await?;
	ws.send(Message::Binary(join.into())).await?;
	Ok(())
}

fn keepalive_frame() -> Result<Vec<u8>, framing::FramingError> {
	control_frame(&[("type", "mrkl")])
}

/// Build an outbound control frame from key/value pairs via the wire codec.
fn control_frame(pairs: &[(&str, &str)]) -> Result<Vec<u8>, framing::FramingError> {
	let mut rec = stt::Record::new();
	for (key, value) in pairs {
		rec.insert(*key, *value);
	}
	framing::encode_frame(&stt::encode(&stt::Value::Record(rec)))
}
