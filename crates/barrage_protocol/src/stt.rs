#![forbid(unsafe_code)]

//! Flat key/value wire codec used by the gateway ("serialize-to-text").
//!
//! A record serializes as `key@=value/` segments in insertion order; literal
//! `@` and `/` inside a value are escaped to `@A` and `@S`. Nested records
//! are encoded to their full text and then escaped wholesale, so the outer
//! splitter never sees an unescaped delimiter.
//!
//! Numbers and booleans serialize to their text form and come back as text:
//! the type round-trip is lossy by design of the format, only the text
//! content is preserved. Decoding is total — malformed segments are dropped,
//! never reported.

use core::fmt;

/// A decoded wire value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Text(String),
	Record(Record),
	List(Vec<Value>),
}

impl Value {
	pub fn as_text(&self) -> Option<&str> {
		match self {
			Value::Text(s) => Some(s.as_str()),
			_ => None,
		}
	}

	pub fn as_record(&self) -> Option<&Record> {
		match self {
			Value::Record(r) => Some(r),
			_ => None,
		}
	}

	pub fn as_list(&self) -> Option<&[Value]> {
		match self {
			Value::List(items) => Some(items),
			_ => None,
		}
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Value::Text(s.to_string())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Self {
		Value::Text(s)
	}
}

impl From<i64> for Value {
	fn from(n: i64) -> Self {
		Value::Text(n.to_string())
	}
}

impl From<u64> for Value {
	fn from(n: u64) -> Self {
		Value::Text(n.to_string())
	}
}

impl From<bool> for Value {
	fn from(b: bool) -> Self {
		Value::Text(if b { "true" } else { "false" }.to_string())
	}
}

impl From<Record> for Value {
	fn from(r: Record) -> Self {
		Value::Record(r)
	}
}

/// An ordered string-keyed mapping with unique keys.
///
/// Keys keep insertion order; inserting an existing key replaces its value in
/// place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
	entries: Vec<(String, Value)>,
}

impl Record {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
		let key = key.into();
		let value = value.into();
		if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
			slot.1 = value;
		} else {
			self.entries.push((key, value));
		}
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
	}

	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.get(key).and_then(Value::as_text)
	}

	pub fn get_record(&self, key: &str) -> Option<&Record> {
		self.get(key).and_then(Value::as_record)
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.entries.iter().any(|(k, _)| k == key)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v))
	}
}

impl fmt::Display for Record {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&encode(&Value::Record(self.clone())))
	}
}

impl FromIterator<(String, Value)> for Record {
	fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
		let mut rec = Record::new();
		for (k, v) in iter {
			rec.insert(k, v);
		}
		rec
	}
}

/// Escape a scalar before splicing it into a record segment.
fn escape(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());
	for c in raw.chars() {
		match c {
			'@' => out.push_str("@A"),
			'/' => out.push_str("@S"),
			other => out.push(other),
		}
	}
	out
}

/// Reverse [`escape`]: `@S` back to `/`, `@A` back to `@`.
fn unescape(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());
	let mut chars = raw.chars().peekable();
	while let Some(c) = chars.next() {
		if c == '@' {
			match chars.peek() {
				Some('S') => {
					chars.next();
					out.push('/');
				}
				Some('A') => {
					chars.next();
					out.push('@');
				}
				_ => out.push('@'),
			}
		} else {
			out.push(c);
		}
	}
	out
}

/// Encode a value into its wire text.
pub fn encode(value: &Value) -> String {
	match value {
		Value::Text(s) => s.clone(),
		Value::Record(rec) => {
			let mut out = String::new();
			for (key, value) in rec.iter() {
				out.push_str(key);
				out.push_str("@=");
				out.push_str(&escape(&encode(value)));
				out.push('/');
			}
			out
		}
		Value::List(items) => {
			let mut out = String::new();
			for item in items {
				out.push_str(&encode(item));
				out.push('/');
			}
			out
		}
	}
}

/// A record value recurses only when its still-escaped text has the exact
/// shape the nested encode path emits: an escaped key separator somewhere and
/// an escaped terminator at the end. Everything else is a scalar, which keeps
/// ordinary text containing `@` or `/` (or even a stray `@=`) intact through
/// a round-trip.
fn is_nested(escaped: &str) -> bool {
	escaped.contains("@A=") && escaped.ends_with("@S")
}

/// Decode wire text into a value. Total: never fails, malformed segments are
/// dropped.
pub fn decode(input: &str) -> Value {
	if input.contains("//") {
		let items = input.split("//").filter(|seg| !seg.is_empty()).map(decode).collect();
		return Value::List(items);
	}

	if input.contains("@=") {
		let mut rec = Record::new();
		for seg in input.split('/') {
			if seg.is_empty() {
				continue;
			}
			let Some((key, raw_value)) = seg.split_once("@=") else {
				continue;
			};
			if key.is_empty() {
				continue;
			}
			let value = if is_nested(raw_value) {
				decode(&unescape(raw_value))
			} else {
				Value::Text(unescape(raw_value))
			};
			rec.insert(key, value);
		}
		return Value::Record(rec);
	}

	Value::Text(input.to_string())
}

/// Decode wire text that is expected to be a record.
///
/// Returns an empty record for anything else, matching the "partially empty
/// on malformed input" contract.
pub fn decode_record(input: &str) -> Record {
	match decode(input) {
		Value::Record(rec) => rec,
		_ => Record::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rec(pairs: &[(&str, &str)]) -> Record {
		pairs.iter().map(|(k, v)| (k.to_string(), Value::from(*v))).collect()
	}

	#[test]
	fn escape_unescape_pairs() {
		assert_eq!(escape("a@b"), "a@Ab");
		assert_eq!(escape("a/b"), "a@Sb");
		assert_eq!(unescape("a@Ab"), "a@b");
		assert_eq!(unescape("a@Sb"), "a/b");
		assert_eq!(unescape("normal string"), "normal string");
	}

	#[test]
	fn encodes_flat_record_in_insertion_order() {
		let r = rec(&[("key1", "value1"), ("key2", "value2")]);
		assert_eq!(encode(&Value::Record(r)), "key1@=value1/key2@=value2/");
	}

	#[test]
	fn encodes_nested_record_with_wholesale_escaping() {
		let mut inner = Record::new();
		inner.insert("nestedKey", "nestedValue");
		let mut outer = Record::new();
		outer.insert("key1", inner);
		assert_eq!(encode(&Value::Record(outer)), "key1@=nestedKey@A=nestedValue@S/");
	}

	#[test]
	fn encodes_list_of_scalars() {
		let list = Value::List(vec![Value::from("value1"), Value::from("value2")]);
		assert_eq!(encode(&list), "value1/value2/");
	}

	#[test]
	fn decodes_flat_record() {
		let v = decode("key1@=value1/key2@=value2/");
		assert_eq!(v, Value::Record(rec(&[("key1", "value1"), ("key2", "value2")])));
	}

	#[test]
	fn decodes_nested_record() {
		let v = decode("key1@=nestedKey@A=nestedValue@S/");
		let rec = v.as_record().unwrap();
		let inner = rec.get_record("key1").unwrap();
		assert_eq!(inner.get_str("nestedKey"), Some("nestedValue"));
	}

	#[test]
	fn decodes_double_slash_as_list() {
		let v = decode("value1//value2//");
		assert_eq!(v, Value::List(vec![Value::from("value1"), Value::from("value2")]));
	}

	#[test]
	fn escaped_delimiters_round_trip() {
		let r = rec(&[("key", "a@b/c")]);
		let text = encode(&Value::Record(r.clone()));
		assert_eq!(text, "key@=a@Ab@Sc/");
		assert_eq!(decode(&text), Value::Record(r));
	}

	#[test]
	fn stray_key_separator_in_value_stays_text() {
		let r = rec(&[("key", "a@=b")]);
		let text = encode(&Value::Record(r.clone()));
		assert_eq!(decode(&text), Value::Record(r));
	}

	#[test]
	fn malformed_segments_are_dropped() {
		let v = decode("key1@=value1/garbage/key2@=value2/");
		let rec = v.as_record().unwrap();
		assert_eq!(rec.len(), 2);
		assert_eq!(rec.get_str("key1"), Some("value1"));
		assert_eq!(rec.get_str("key2"), Some("value2"));
	}

	#[test]
	fn duplicate_keys_replace_in_place() {
		let mut r = Record::new();
		r.insert("a", "1");
		r.insert("b", "2");
		r.insert("a", "3");
		assert_eq!(r.len(), 2);
		assert_eq!(r.get_str("a"), Some("3"));
		assert_eq!(encode(&Value::Record(r)), "a@=3/b@=2/");
	}

	#[test]
	fn numbers_and_booleans_decode_as_text() {
		let mut r = Record::new();
		r.insert("n", 123i64);
		r.insert("b", true);
		let decoded = decode_record(&encode(&Value::Record(r)));
		assert_eq!(decoded.get_str("n"), Some("123"));
		assert_eq!(decoded.get_str("b"), Some("true"));
	}

	#[test]
	fn doubly_nested_records_round_trip() {
		let mut inner = Record::new();
		inner.insert("k", "v");
		let mut mid = Record::new();
		mid.insert("mid", inner);
		let mut outer = Record::new();
		outer.insert("outer", mid);

		let decoded = decode_record(&encode(&Value::Record(outer)));
		let mid = decoded.get_record("outer").unwrap();
		let inner = mid.get_record("mid").unwrap();
		assert_eq!(inner.get_str("k"), Some("v"));
	}

	#[test]
	fn decodes_real_voice_message_frame() {
		let frame = "vrid@=2013081579710062592/btype@=voiceDanmu/chatmsg@=nn@A=user one@Slevel@A=21@Stype@A=chatmsg@Suid@A=110510743@Stxt@A=hello there@Sic@A=avanew@ASface@AS2017@S/cprice@=1000/crealPrice@=1000/type@=comm_chatmsg/rid@=317422/uid@=110510743/now@=1768791052053/";
		let rec = decode_record(frame);
		assert_eq!(rec.get_str("btype"), Some("voiceDanmu"));
		assert_eq!(rec.get_str("crealPrice"), Some("1000"));

		let chatmsg = rec.get_record("chatmsg").expect("nested chatmsg record");
		assert_eq!(chatmsg.get_str("nn"), Some("user one"));
		assert_eq!(chatmsg.get_str("txt"), Some("hello there"));
		assert_eq!(chatmsg.get_str("ic"), Some("avanew/face/2017"));
	}
}
