use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How the coordinator picks a worker for the next item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalance {
    /// Fixed counter modulo the worker count.
    #[default]
    RoundRobin,
    /// Worker with the fewest items in flight; lowest index on ties.
    LeastLoaded,
    Random,
}

impl FromStr for LoadBalance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "round_robin" | "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            "least_loaded" | "least-loaded" | "leastloaded" => Ok(Self::LeastLoaded),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown load-balance strategy '{}'", other)),
        }
    }
}

/// Worker selection state. Owned by the coordinator thread alone.
pub(crate) struct Balancer {
    strategy: LoadBalance,
    next: usize,
}

impl Balancer {
    pub(crate) fn new(strategy: LoadBalance) -> Self {
        Self { strategy, next: 0 }
    }

    pub(crate) fn pick(&mut self, in_flight: &[AtomicUsize]) -> usize {
        let workers = in_flight.len();
        match self.strategy {
            LoadBalance::RoundRobin => {
                let chosen = self.next % workers;
                self.next = self.next.wrapping_add(1);
                chosen
            }
            LoadBalance::LeastLoaded => in_flight
                .iter()
                .enumerate()
                .min_by_key(|(_, load)| load.load(Ordering::Acquire))
                .map(|(index, _)| index)
                .unwrap_or(0),
            LoadBalance::Random => rand::thread_rng().gen_range(0..workers),
        }
    }
}
