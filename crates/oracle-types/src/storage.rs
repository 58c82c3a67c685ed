//! Storage namespaces for the oracle.

use std::str::FromStr;

/// Storage keys for the persisted data collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Match handles and their ball cursor, keyed by match id.
	Matches,
	/// Last transition record per ball, keyed by `<match_id>:<ball>`.
	Balls,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Matches => "matches",
			StorageKey::Balls => "balls",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Matches, Self::Balls].into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"matches" => Ok(Self::Matches),
			"balls" => Ok(Self::Balls),
			_ => Err(()),
		}
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
