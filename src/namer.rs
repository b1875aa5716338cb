//! Random environment name generation with collision avoidance.

use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::debug;

use crate::merge::{NameChoice, normalize_env_name};
use crate::storage::{ObjectStore, StateStore, StorageError};

/// Number of generated candidates tried before giving up.
pub const NAME_CLASH_RETRIES: usize = 10;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brisk", "calm", "clever", "cosmic", "crisp", "dapper", "eager", "fancy",
    "gentle", "glad", "hardy", "humble", "jolly", "keen", "lively", "lucid", "mellow", "nimble",
    "noble", "plucky", "quiet", "rapid", "serene", "sharp", "snappy", "steady", "sunny", "swift",
    "tidy", "vivid", "witty", "zesty",
];

const NOUNS: &[&str] = &[
    "babbage", "bardeen", "bohr", "curie", "darwin", "dijkstra", "einstein", "euler", "faraday",
    "feynman", "galileo", "gauss", "hopper", "hypatia", "kepler", "knuth", "lamarr", "lovelace",
    "meitner", "newton", "noether", "pascal", "pike", "ritchie", "shannon", "tesla", "thompson",
    "turing", "wozniak", "yalow",
];

/// Source of candidate environment names.
pub trait Namer {
    /// Produces a new candidate name.
    fn random_name(&self) -> String;
}

/// Generates `adjective-noun` names from fixed word lists.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomNamer;

impl Namer for RandomNamer {
    fn random_name(&self) -> String {
        let mut rng = rand::thread_rng();
        let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
        let noun = NOUNS.choose(&mut rng).copied().unwrap_or("turing");
        let suffix: u16 = rng.gen_range(0..1000);
        format!("{adjective}-{noun}-{suffix:03}")
    }
}

/// Errors raised while settling on an environment name.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResolveError {
    /// Every generated candidate was already taken.
    #[error("failed to generate a random name: all {attempts} candidates already exist")]
    NameClash {
        /// Number of candidates tried.
        attempts: usize,
    },
    /// Existence checks against the store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Turns a [`NameChoice`] into a concrete environment name.
///
/// Given names pass through untouched. Generated names are normalised and
/// retried until one has neither a stable nor a tainted state in `store`.
///
/// # Errors
///
/// Returns [`ResolveError::NameClash`] after [`NAME_CLASH_RETRIES`] taken
/// candidates and [`ResolveError::Storage`] when an existence check fails.
pub async fn resolve_name<S, N>(
    choice: &NameChoice,
    store: &StateStore<S>,
    namer: &N,
) -> Result<String, ResolveError>
where
    S: ObjectStore + Sync,
    N: Namer + ?Sized,
{
    match choice {
        NameChoice::Given(name) => Ok(name.clone()),
        NameChoice::Generate => {
            for attempt in 1..=NAME_CLASH_RETRIES {
                let candidate = normalize_env_name(&namer.random_name());
                if candidate.is_empty() {
                    continue;
                }
                if store.exists(&candidate).await? {
                    debug!(%candidate, attempt, "generated name already in use");
                    continue;
                }
                return Ok(candidate);
            }
            Err(ResolveError::NameClash {
                attempts: NAME_CLASH_RETRIES,
            })
        }
    }
}
