//! Seeded fault schedules.
//!
//! A [`ChaosPlan`] is a reproducible sequence of broker faults, traffic and
//! time steps generated from a seed. The same seed always yields the same
//! plan, so a failing seed can be replayed.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One simulated step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChaosStep {
    /// Let virtual time pass.
    Advance(Duration),
    /// Broker drops every connection.
    DropConnections,
    /// Another user publishes to the room.
    Publish,
    /// A message is persisted while nobody receives it.
    PublishUnseen,
    /// The broker delivers the most recent message again.
    Redeliver,
    /// The broker sends a malformed frame.
    InjectGarbage,
    /// Toggle duplicate delivery of every message.
    ToggleDuplicates,
    /// History responses are held back.
    HoldHistory,
    /// Held history responses go out.
    ReleaseHistory,
    /// The next history request fails.
    FailHistory,
    /// The client publishes.
    Send,
}

/// Reproducible fault schedule.
#[derive(Debug, Clone)]
pub struct ChaosPlan {
    /// Seed the plan was generated from.
    pub seed: u64,
    /// Steps in order.
    pub steps: Vec<ChaosStep>,
}

impl ChaosPlan {
    /// Generate `len` steps from `seed`.
    pub fn generate(seed: u64, len: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let steps = (0..len).map(|_| Self::step(&mut rng)).collect();
        Self { seed, steps }
    }

    fn step(rng: &mut ChaCha8Rng) -> ChaosStep {
        match rng.gen_range(0..100) {
            0..=19 => ChaosStep::Advance(Duration::from_millis(rng.gen_range(50..8_000))),
            20..=29 => ChaosStep::DropConnections,
            30..=49 => ChaosStep::Publish,
            50..=57 => ChaosStep::PublishUnseen,
            58..=65 => ChaosStep::Redeliver,
            66..=69 => ChaosStep::InjectGarbage,
            70..=74 => ChaosStep::ToggleDuplicates,
            75..=79 => ChaosStep::HoldHistory,
            80..=87 => ChaosStep::ReleaseHistory,
            88..=90 => ChaosStep::FailHistory,
            _ => ChaosStep::Send,
        }
    }
}
