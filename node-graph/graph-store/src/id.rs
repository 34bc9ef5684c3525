use crate::error::InternalError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

/// How many fresh candidates the generator tries before giving up on a prefix.
/// Collisions require either an adversarial document or a broken RNG, so hitting
/// this limit poisons the generator's owner.
pub const ID_GENERATION_RETRIES: u32 = 16;

macro_rules! id_newtype {
	($(#[doc = $doc:expr] $name:ident),* $(,)?) => {
		$(
			#[doc = $doc]
			#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
			#[serde(transparent)]
			pub struct $name(String);

			impl $name {
				pub fn new(id: impl Into<String>) -> Self {
					let id = id.into();
					debug_assert!(!id.is_empty(), concat!(stringify!($name), " must be non-empty"));
					Self(id)
				}

				pub fn as_str(&self) -> &str {
					&self.0
				}
			}

			impl fmt::Display for $name {
				fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
					f.write_str(&self.0)
				}
			}

			impl From<&str> for $name {
				fn from(id: &str) -> Self {
					Self::new(id)
				}
			}
		)*
	};
}

id_newtype! {
	#[doc = "Identifies a whole graph; stable across saves and across subgraph embedding."]
	GraphId,
	#[doc = "Identifies a node within a document."]
	NodeId,
	#[doc = "Identifies a socket within a document."]
	SocketId,
	#[doc = "Identifies a wire within a document."]
	WireId,
	#[doc = "Identifies a frame within a document."]
	FrameId,
}

/// Produces document-unique ids of the form `prefix-0123456789abcdef`.
///
/// The generator is seeded explicitly so that embedders (and tests) get reproducible
/// documents; see [`IdGenerator::from_seed`].
#[derive(Debug)]
pub struct IdGenerator {
	rng: StdRng,
}

impl IdGenerator {
	/// Seed from the system clock. Prefer [`IdGenerator::from_seed`] anywhere determinism matters.
	pub fn new() -> Self {
		let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|duration| duration.as_nanos() as u64).unwrap_or(0);
		Self::from_seed(nanos)
	}

	pub fn from_seed(seed: u64) -> Self {
		Self { rng: StdRng::seed_from_u64(seed) }
	}

	fn candidate(&mut self, prefix: &str) -> String {
		format!("{prefix}-{:016x}", self.rng.random::<u64>())
	}

	/// Generate a fresh id. `taken` reports whether a candidate is already in use;
	/// after [`ID_GENERATION_RETRIES`] collisions the generator reports an internal error.
	pub fn unique(&mut self, prefix: &str, taken: impl Fn(&str) -> bool) -> Result<String, InternalError> {
		for _ in 0..ID_GENERATION_RETRIES {
			let candidate = self.candidate(prefix);
			if !taken(&candidate) {
				return Ok(candidate);
			}
		}
		Err(InternalError::IdGenerationExhausted { retries: ID_GENERATION_RETRIES })
	}
}

impl Default for IdGenerator {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn seeded_generators_are_reproducible() {
		let mut a = IdGenerator::from_seed(7);
		let mut b = IdGenerator::from_seed(7);
		for _ in 0..8 {
			assert_eq!(a.candidate("node"), b.candidate("node"));
		}
	}

	#[test]
	fn unique_retries_then_fails() {
		let mut generator = IdGenerator::from_seed(0);
		let error = generator.unique("node", |_| true).unwrap_err();
		assert_eq!(error, InternalError::IdGenerationExhausted { retries: ID_GENERATION_RETRIES });

		let id = generator.unique("node", |_| false).unwrap();
		assert!(id.starts_with("node-"));
	}

	#[test]
	fn ids_serialize_transparently() {
		let id = NodeId::new("node-1");
		assert_eq!(serde_json::to_string(&id).unwrap(), "\"node-1\"");
		assert_eq!(serde_json::from_str::<NodeId>("\"node-1\"").unwrap(), id);
	}
}
