//! Text format of offline credential records.
//!
//! A record is `base64("<iv>/<ciphertext>")` where both halves are rendered the
//! way a JavaScript `Uint8Array.toString()` renders bytes: decimal values
//! joined by commas. Front-ends produce and consume this format directly, so it
//! is fixed.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::RecordFormatError;

/// Parsed offline credential record.
#[derive(Clone, PartialEq, Eq)]
pub struct OfflineRecord {
	pub iv: Vec<u8>,
	pub ciphertext: Vec<u8>,
}

impl std::fmt::Debug for OfflineRecord {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OfflineRecord")
			.field("iv_len", &self.iv.len())
			.field("ciphertext_len", &self.ciphertext.len())
			.finish()
	}
}

impl OfflineRecord {
	pub fn new(iv: Vec<u8>, ciphertext: Vec<u8>) -> Self {
		Self { iv, ciphertext }
	}

	/// Renders the record in its base64 text form.
	pub fn encode(&self) -> String {
		let joined = format!("{}/{}", bytes_to_js_string(&self.iv), bytes_to_js_string(&self.ciphertext));
		STANDARD.encode(joined)
	}

	/// Parses the base64 text form. ASCII whitespace anywhere in the text is
	/// ignored, so line-wrapped records decode.
	pub fn decode(record: &str) -> Result<Self, RecordFormatError> {
		let compact: String = record.chars().filter(|c| !c.is_ascii_whitespace()).collect();
		let raw = STANDARD.decode(compact).map_err(|_| RecordFormatError::NotBase64)?;
		let joined = String::from_utf8(raw).map_err(|_| RecordFormatError::NotBase64)?;

		let mut parts = joined.split('/');
		let (Some(iv), Some(ciphertext), None) = (parts.next(), parts.next(), parts.next()) else {
			return Err(RecordFormatError::MissingParts);
		};

		Ok(Self {
			iv: js_string_to_bytes(iv).ok_or(RecordFormatError::NotDeserializable)?,
			ciphertext: js_string_to_bytes(ciphertext).ok_or(RecordFormatError::NotDeserializable)?,
		})
	}
}

/// Renders `bytes` as `Uint8Array.toString()` does, e.g. `"73,229,86"`.
pub fn bytes_to_js_string(bytes: &[u8]) -> String {
	let mut out = String::with_capacity(bytes.len() * 4);
	for (i, byte) in bytes.iter().enumerate() {
		if i > 0 {
			out.push(',');
		}
		out.push_str(&byte.to_string());
	}
	out
}

/// Parses a comma separated list of integers, each taken modulo 256.
///
/// Returns `None` if any element is not an integer. An empty string is a
/// single empty element and therefore invalid.
pub fn js_string_to_bytes(s: &str) -> Option<Vec<u8>> {
	s.split(',').map(parse_byte).collect()
}

fn parse_byte(item: &str) -> Option<u8> {
	let item = item.trim();
	let (negative, digits) = match item.as_bytes().first() {
		Some(b'-') => (true, &item[1..]),
		Some(b'+') => (false, &item[1..]),
		_ => (false, item),
	};
	if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}

	let residue = digits.bytes().fold(0u32, |acc, b| (acc * 10 + u32::from(b - b'0')) % 256);
	let value = if negative { (256 - residue) % 256 } else { residue };
	u8::try_from(value).ok()
}
