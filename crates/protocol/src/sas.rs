//! Short authentication strings compared by humans during enrollment.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Characters a SAS code is drawn from; visually ambiguous ones are left out.
pub const SAS_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const SAS_CODE_LEN: usize = 4;
/// Number of choices shown to the user, the true code included.
pub const SAS_CANDIDATES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SasCode(String);

impl SasCode {
	pub fn random() -> Self {
		let alphabet = SAS_ALPHABET.as_bytes();
		let mut rng = rand::thread_rng();
		let code = (0..SAS_CODE_LEN).map(|_| char::from(alphabet[rng.gen_range(0..alphabet.len())])).collect();
		Self(code)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl TryFrom<String> for SasCode {
	type Error = ProtocolError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		if value.len() == SAS_CODE_LEN && value.chars().all(|c| SAS_ALPHABET.contains(c)) {
			Ok(Self(value))
		} else {
			Err(ProtocolError::InvalidSasCode(value))
		}
	}
}

impl FromStr for SasCode {
	type Err = ProtocolError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::try_from(s.to_owned())
	}
}

impl From<SasCode> for String {
	fn from(value: SasCode) -> Self {
		value.0
	}
}

impl fmt::Display for SasCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Returns `size` distinct codes in random order, exactly one of them `valid`.
pub fn sas_candidates(valid: &SasCode, size: usize) -> Vec<SasCode> {
	let mut candidates = vec![valid.clone()];
	while candidates.len() < size {
		let decoy = SasCode::random();
		if !candidates.contains(&decoy) {
			candidates.push(decoy);
		}
	}
	candidates.shuffle(&mut rand::thread_rng());
	candidates
}
