#![forbid(unsafe_code)]

//! Stateless accept/drop predicates evaluated per event kind.
//!
//! Missing or empty configuration fields mean "rule does not apply" — a
//! partial snapshot never blocks the whole pipeline.

use crate::{ChatRules, CommandOptions, EntranceRules, GiftInfo, GiftRules};

/// True when `text` contains any of the space-separated `banned` substrings.
fn contains_banned(banned: &str, text: &str) -> bool {
	banned.split_whitespace().any(|word| text.contains(word))
}

/// Chat accept check: level ban, text keywords, nickname substrings and
/// optional repeat suppression against the previously accepted text.
///
/// A record without a level field skips the level rule.
pub fn chat_allowed(rules: &ChatRules, level: Option<u32>, text: &str, nickname: &str, last_accepted: Option<&str>) -> bool {
	if let Some(level) = level
		&& level <= rules.ban_level
	{
		return false;
	}
	if contains_banned(&rules.ban_keywords, text) {
		return false;
	}
	if contains_banned(&rules.ban_nicknames, nickname) {
		return false;
	}
	if rules.filter_repeats && last_accepted == Some(text) {
		return false;
	}
	true
}

/// Gift accept check against the catalog lookup. Unknown gifts always pass:
/// a stale catalog must not suppress traffic.
pub fn gift_allowed(rules: &GiftRules, info: Option<&GiftInfo>) -> bool {
	let Some(info) = info else {
		return true;
	};

	if (info.price_cents as f64) < rules.min_price * 100.0 {
		return false;
	}
	if contains_banned(&rules.ban_keywords, &info.name) {
		return false;
	}
	true
}

pub fn entrance_allowed(rules: &EntranceRules, level: Option<u32>) -> bool {
	match level {
		Some(level) => level > rules.ban_level,
		None => true,
	}
}

/// Fan-badge level-up announcements below the configured level are noise.
pub fn fan_level_allowed(rules: &GiftRules, level: u32) -> bool {
	level >= rules.min_fan_level
}

/// Match `text` against the command prefix and keyword table.
///
/// Returns the matched keyword and the remaining argument text.
pub fn match_command(options: &CommandOptions, text: &str) -> Option<(String, String)> {
	if options.prefix.is_empty() {
		return None;
	}
	let rest = text.strip_prefix(&options.prefix)?;

	let keyword = options
		.keywords
		.iter()
		.find(|kw| kw.enabled && !kw.name.is_empty() && rest.contains(&kw.name))?;

	let args = rest.replacen(&keyword.name, "", 1).trim().to_string();
	Some((keyword.name.clone(), args))
}
