//! Domain controller selection.
//!
//! One server is picked at random per connection to spread load across the
//! configured list. This is not failover: a server that refuses the bind is
//! not retried against another one.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};

/// Picks a server from a list using an injected randomness source.
pub struct ServerSelector {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl ServerSelector {
    pub fn new(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Selector seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Deterministic selector.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn pick<'a>(&self, servers: &'a [String]) -> Option<&'a str> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        servers.choose(&mut **rng).map(String::as_str)
    }
}

impl Default for ServerSelector {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl std::fmt::Debug for ServerSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSelector").finish_non_exhaustive()
    }
}
