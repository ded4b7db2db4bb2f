use std::time::{Duration, Instant};

use barrage_client::dispatch::{DEFAULT_DEDUP_WINDOW, Dispatcher};
use barrage_client::store::{SharedStores, shared_stores};
use barrage_client::{
	CommandKeyword, EnabledKinds, GiftEventKind, Options, StaticGiftCatalog, SuperchatTierStyle,
};
use barrage_domain::RoomId;

fn room() -> RoomId {
	RoomId::new("317422").expect("room id")
}

fn options() -> Options {
	let mut opts = Options::for_room(room());
	opts.enabled = EnabledKinds::all();
	opts
}

fn pipeline(opts: Options) -> (Dispatcher, SharedStores) {
	let stores = shared_stores(opts.threshold);
	let dispatcher = Dispatcher::new(opts, stores.clone(), DEFAULT_DEDUP_WINDOW);
	(dispatcher, stores)
}

fn tier(min_price: f64) -> SuperchatTierStyle {
	SuperchatTierStyle {
		min_price,
		header_color: "rgb(0,0,0)".to_string(),
		body_color: "rgb(1,1,1)".to_string(),
	}
}

#[test]
fn chat_frame_produces_chat_event() {
	let (mut dispatcher, stores) = pipeline(options());
	let catalog = StaticGiftCatalog::new();

	dispatcher.dispatch_frame(
		"type@=chatmsg/uid@=u1/nn@=tester/level@=10/txt@=hello world/cid@=c1/",
		&catalog,
		Instant::now(),
	);

	let guard = stores.read();
	assert_eq!(guard.chat.len(), 1);
	let ev = guard.chat.latest().expect("chat event");
	assert_eq!(ev.text, "hello world");
	assert_eq!(ev.nickname, "tester");
	assert_eq!(ev.level, 10);
}

#[test]
fn banned_keyword_drops_chat() {
	let mut opts = options();
	opts.chat.ban_keywords = "bad".to_string();
	let (mut dispatcher, stores) = pipeline(opts);
	let catalog = StaticGiftCatalog::new();

	dispatcher.dispatch_frame(
		"type@=chatmsg/uid@=u1/nn@=tester/level@=10/txt@=this is bad/cid@=c1/",
		&catalog,
		Instant::now(),
	);

	assert!(stores.read().chat.is_empty());
}

#[test]
fn duplicate_frames_dispatch_once() {
	let (mut dispatcher, stores) = pipeline(options());
	let catalog = StaticGiftCatalog::new();
	let frame = "type@=chatmsg/uid@=u1/nn@=tester/level@=10/txt@=again/cid@=same-id/";

	dispatcher.dispatch_frame(frame, &catalog, Instant::now());
	dispatcher.dispatch_frame(frame, &catalog, Instant::now());

	assert_eq!(stores.read().chat.len(), 1);
}

#[test]
fn unknown_kind_is_dropped_silently() {
	let (mut dispatcher, stores) = pipeline(options());
	let catalog = StaticGiftCatalog::new();

	dispatcher.dispatch_frame("type@=somenewthing/cid@=x1/data@=1/", &catalog, Instant::now());

	let guard = stores.read();
	assert!(guard.chat.is_empty());
	assert!(guard.gift.is_empty());
	assert!(guard.superchat.is_empty());
}

#[test]
fn store_eviction_keeps_newest() {
	let mut opts = options();
	opts.threshold = 3;
	let (mut dispatcher, stores) = pipeline(opts);
	let catalog = StaticGiftCatalog::new();

	for n in 0..5 {
		let frame = format!("type@=chatmsg/uid@=u1/nn@=tester/level@=10/txt@=msg {n}/cid@=c{n}/");
		dispatcher.dispatch_frame(&frame, &catalog, Instant::now());
	}

	let guard = stores.read();
	assert_eq!(guard.chat.len(), 3);
	let texts: Vec<_> = guard.chat.iter().map(|e| e.text.clone()).collect();
	assert_eq!(texts, vec!["msg 2", "msg 3", "msg 4"]);
}

#[test]
fn gift_contribution_unlocks_one_superchat() {
	let mut opts = options();
	opts.superchat.tiers = vec![tier(500.0), tier(50.0)];
	let (mut dispatcher, stores) = pipeline(opts);

	let mut catalog = StaticGiftCatalog::new();
	// 50.00 yuan unit price
	catalog.insert("824", "rocket", 5000);

	let now = Instant::now();
	dispatcher.dispatch_frame(
		"type@=dgb/uid@=u1/nn@=giver/level@=20/gfid@=824/gfcnt@=1/hits@=1/cid@=g1/",
		&catalog,
		now,
	);

	{
		let guard = stores.read();
		assert_eq!(guard.gift.len(), 1, "gift event always produced");
		assert!(guard.superchat.is_empty());
	}

	dispatcher.dispatch_frame(
		"type@=chatmsg/uid@=u1/nn@=giver/level@=20/txt@=take this #sc/cid@=c1/",
		&catalog,
		now,
	);

	{
		let guard = stores.read();
		assert_eq!(guard.superchat.len(), 1);
		assert!(guard.chat.is_empty(), "keyword message upgrades instead of a chat entry");
		let sc = guard.superchat.latest().expect("superchat");
		assert_eq!(sc.price, 50.0);
		assert_eq!(sc.tier, 3);
		assert_eq!(sc.duration_secs, 120);
		assert_eq!(sc.user_id, "u1");
		assert_eq!(sc.text, "take this #sc");
	}

	// the contribution is consumed: a third keyword message is plain chat
	dispatcher.dispatch_frame(
		"type@=chatmsg/uid@=u1/nn@=giver/level@=20/txt@=one more #sc/cid@=c2/",
		&catalog,
		now,
	);

	let guard = stores.read();
	assert_eq!(guard.superchat.len(), 1);
	assert_eq!(guard.chat.len(), 1);
}

#[test]
fn cheap_gift_does_not_bank_a_contribution() {
	let mut opts = options();
	opts.superchat.tiers = vec![tier(500.0), tier(50.0)];
	let (mut dispatcher, stores) = pipeline(opts);

	let mut catalog = StaticGiftCatalog::new();
	catalog.insert("124", "like", 100);

	let now = Instant::now();
	dispatcher.dispatch_frame(
		"type@=dgb/uid@=u1/nn@=giver/level@=20/gfid@=124/gfcnt@=3/hits@=3/cid@=g1/",
		&catalog,
		now,
	);
	dispatcher.dispatch_frame(
		"type@=chatmsg/uid@=u1/nn@=giver/level@=20/txt@=hello #sc/cid@=c1/",
		&catalog,
		now,
	);

	let guard = stores.read();
	assert!(guard.superchat.is_empty());
	assert_eq!(guard.chat.len(), 1);
}

#[test]
fn gift_below_price_floor_is_dropped_but_unknown_passes() {
	let mut opts = options();
	opts.gift.min_price = 10.0;
	let (mut dispatcher, stores) = pipeline(opts);

	let mut catalog = StaticGiftCatalog::new();
	catalog.insert("124", "like", 100);

	dispatcher.dispatch_frame(
		"type@=dgb/uid@=u1/nn@=giver/level@=20/gfid@=124/gfcnt@=1/cid@=g1/",
		&catalog,
		Instant::now(),
	);
	dispatcher.dispatch_frame(
		"type@=dgb/uid@=u2/nn@=giver2/level@=20/gfid@=999/gfcnt@=1/cid@=g2/",
		&catalog,
		Instant::now(),
	);

	let guard = stores.read();
	assert_eq!(guard.gift.len(), 1, "unknown gift id fails open");
	match &guard.gift.latest().expect("gift").kind {
		GiftEventKind::Gift { gift_id, name, .. } => {
			assert_eq!(gift_id, "999");
			assert!(name.is_none());
		}
		other => panic!("unexpected kind: {other:?}"),
	}
}

#[test]
fn command_event_rides_along_with_chat() {
	let mut opts = options();
	opts.command.prefix = "#".to_string();
	opts.command.keywords = vec![CommandKeyword::new("play")];
	let (mut dispatcher, stores) = pipeline(opts);
	let catalog = StaticGiftCatalog::new();

	dispatcher.dispatch_frame(
		"type@=chatmsg/uid@=u1/nn@=dj/level@=15/txt@=#play some song/cid@=c1/",
		&catalog,
		Instant::now(),
	);

	let guard = stores.read();
	assert_eq!(guard.chat.len(), 1);
	assert_eq!(guard.command.len(), 1);
	let cmd = guard.command.latest().expect("command event");
	assert_eq!(cmd.command, "play");
	assert_eq!(cmd.args, "some song");
	assert_eq!(cmd.text, "#play some song");
}

#[test]
fn entrance_filtered_by_level() {
	let mut opts = options();
	opts.entrance.ban_level = 10;
	let (mut dispatcher, stores) = pipeline(opts);
	let catalog = StaticGiftCatalog::new();

	dispatcher.dispatch_frame("type@=uenter/uid@=u1/nn@=lowbie/level@=5/cid@=e1/", &catalog, Instant::now());
	dispatcher.dispatch_frame("type@=uenter/uid@=u2/nn@=regular/level@=30/nl@=2/cid@=e2/", &catalog, Instant::now());

	let guard = stores.read();
	assert_eq!(guard.entrance.len(), 1);
	let ev = guard.entrance.latest().expect("entrance");
	assert_eq!(ev.nickname, "regular");
	assert_eq!(ev.noble_level, 2);
}

#[test]
fn noble_broadcast_for_other_room_is_dropped() {
	let (mut dispatcher, stores) = pipeline(options());
	let catalog = StaticGiftCatalog::new();

	dispatcher.dispatch_frame(
		"type@=anbc/rid@=0/bt@=1/uid@=u1/unk@=noblesse/nl@=4/drid@=999999/cid@=n1/",
		&catalog,
		Instant::now(),
	);
	dispatcher.dispatch_frame(
		"type@=anbc/rid@=0/bt@=1/uid@=u2/unk@=localnoble/nl@=5/drid@=317422/cid@=n2/",
		&catalog,
		Instant::now(),
	);

	let guard = stores.read();
	assert_eq!(guard.gift.len(), 1);
	match &guard.gift.latest().expect("gift").kind {
		GiftEventKind::Noble { level, renewal } => {
			assert_eq!(*level, 5);
			assert!(!renewal);
		}
		other => panic!("unexpected kind: {other:?}"),
	}
}

#[test]
fn fan_badge_upgrades_respect_room_and_level_floor() {
	let mut opts = options();
	opts.gift.min_fan_level = 6;
	let (mut dispatcher, stores) = pipeline(opts);
	let catalog = StaticGiftCatalog::new();

	// wrong room
	dispatcher.dispatch_frame(
		"type@=blab/uid@=u1/nn@=fan/lbl@=13/bl@=14/ba@=1/bnn@=crew/rid@=111111/cid@=b1/",
		&catalog,
		Instant::now(),
	);
	// below level floor
	dispatcher.dispatch_frame(
		"type@=blab/uid@=u2/nn@=fan2/lbl@=2/bl@=3/ba@=1/bnn@=crew/rid@=317422/cid@=b2/",
		&catalog,
		Instant::now(),
	);
	// accepted, broadcast variant carries its kind in btype
	dispatcher.dispatch_frame(
		"btype@=fansupgradebroadcast/type@=configscreen/rid@=317422/userName@=bigfan/otherContent@=41/now@=1641356569850/",
		&catalog,
		Instant::now(),
	);

	let guard = stores.read();
	assert_eq!(guard.gift.len(), 1);
	let ev = guard.gift.latest().expect("gift");
	assert_eq!(ev.nickname, "bigfan");
	match &ev.kind {
		GiftEventKind::FanBadgeLevel { level } => assert_eq!(*level, 41),
		other => panic!("unexpected kind: {other:?}"),
	}
}

#[test]
fn native_superchat_kinds_price_rules() {
	let (mut dispatcher, stores) = pipeline(options());
	let catalog = StaticGiftCatalog::new();

	// direct kind with explicit price
	dispatcher.dispatch_frame(
		"type@=sc/uid@=u1/nn@=payer/txt@=direct superchat/price@=120/cid@=s1/",
		&catalog,
		Instant::now(),
	);
	// voice message: currency subunits divided by 100, fields from the
	// nested sub-record
	dispatcher.dispatch_frame(
		"vrid@=v1/btype@=voiceDanmu/chatmsg@=nn@A=Speaker@Suid@A=u9@Stxt@A=voice text@S/cprice@=3000/crealPrice@=3000/type@=comm_chatmsg/rid@=317422/uid@=u9/",
		&catalog,
		Instant::now(),
	);
	// fan-badge announcement: negative tier clamps to zero
	dispatcher.dispatch_frame("type@=fansPaper/uid@=u3/nn@=fan/txt@=badge text/cid@=s3/", &catalog, Instant::now());
	// professional gift announcement: fixed negative tier
	dispatcher.dispatch_frame(
		"type@=professgiftsrc/uid@=u4/nn@=pro/txt@=pro gift/cid@=s4/",
		&catalog,
		Instant::now(),
	);

	let guard = stores.read();
	let items = guard.superchat.snapshot();
	assert_eq!(items.len(), 4);

	assert_eq!(items[0].price, 120.0);
	assert_eq!(items[0].tier, 4);
	assert_eq!(items[0].text, "direct superchat");

	assert_eq!(items[1].price, 30.0);
	assert_eq!(items[1].tier, 2);
	assert_eq!(items[1].nickname, "Speaker");
	assert_eq!(items[1].user_id, "u9");
	assert_eq!(items[1].text, "voice text");

	assert_eq!(items[2].price, 0.0);
	assert_eq!(items[2].tier, 1);

	assert_eq!(items[3].price, 0.0);
	assert_eq!(items[3].tier, 1);
}

#[test]
fn repeat_suppression_tracks_last_accepted_text() {
	let mut opts = options();
	opts.chat.filter_repeats = true;
	let (mut dispatcher, stores) = pipeline(opts);
	let catalog = StaticGiftCatalog::new();

	dispatcher.dispatch_frame(
		"type@=chatmsg/uid@=u1/nn@=a/level@=10/txt@=same thing/cid@=r1/",
		&catalog,
		Instant::now(),
	);
	dispatcher.dispatch_frame(
		"type@=chatmsg/uid@=u2/nn@=b/level@=10/txt@=same thing/cid@=r2/",
		&catalog,
		Instant::now(),
	);
	dispatcher.dispatch_frame(
		"type@=chatmsg/uid@=u3/nn@=c/level@=10/txt@=other thing/cid@=r3/",
		&catalog,
		Instant::now(),
	);

	assert_eq!(stores.read().chat.len(), 2);
}

#[test]
fn disabled_kind_short_circuits() {
	let mut opts = options();
	opts.enabled.entrance = false;
	let (mut dispatcher, stores) = pipeline(opts);
	let catalog = StaticGiftCatalog::new();

	dispatcher.dispatch_frame("type@=uenter/uid@=u1/nn@=ghost/level@=30/cid@=e1/", &catalog, Instant::now());

	assert!(stores.read().entrance.is_empty());
}

#[test]
fn expired_contribution_yields_plain_chat() {
	let mut opts = options();
	opts.superchat.tiers = vec![tier(50.0)];
	opts.superchat.contribution_ttl_secs = 10;
	let (mut dispatcher, stores) = pipeline(opts);

	let mut catalog = StaticGiftCatalog::new();
	catalog.insert("824", "rocket", 5000);

	let start = Instant::now();
	dispatcher.dispatch_frame(
		"type@=dgb/uid@=u1/nn@=giver/level@=20/gfid@=824/gfcnt@=1/cid@=g1/",
		&catalog,
		start,
	);
	dispatcher.dispatch_frame(
		"type@=chatmsg/uid@=u1/nn@=giver/level@=20/txt@=late #sc/cid@=c1/",
		&catalog,
		start + Duration::from_secs(11),
	);

	let guard = stores.read();
	assert!(guard.superchat.is_empty(), "stale contribution must not unlock");
	assert_eq!(guard.chat.len(), 1);
}
