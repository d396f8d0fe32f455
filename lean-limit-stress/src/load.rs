use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use anyhow::anyhow;
use hdrhistogram::Histogram;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use lean_limit::Reason;
use lean_limit::TokenBucketLimiter;

use crate::registry::Registry;

/// Shape of one load run.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub identities: u64,
    pub workers: usize,
    pub duration: Duration,
    pub take: u16,
    pub seed: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Outcomes {
    pub admitted: u64,
    pub exhausted: u64,
    pub oversized: u64,
    pub contended: u64,
}

impl Outcomes {
    fn record(&mut self, flow: ControlFlow<Reason>) {
        match flow {
            ControlFlow::Continue(()) => self.admitted += 1,
            ControlFlow::Break(Reason::Exhausted { .. }) => self.exhausted += 1,
            ControlFlow::Break(Reason::Oversized) => self.oversized += 1,
            ControlFlow::Break(Reason::Contended) => self.contended += 1,
        }
    }

    fn merge(&mut self, other: &Outcomes) {
        self.admitted += other.admitted;
        self.exhausted += other.exhausted;
        self.oversized += other.oversized;
        self.contended += other.contended;
    }

    pub fn total(&self) -> u64 {
        self.admitted + self.exhausted + self.oversized + self.contended
    }
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub elapsed: Duration,
    pub outcomes: Outcomes,
    /// Tokens admitted per identity.
    pub admitted_tokens: HashMap<u64, u64>,
    /// Latency of individual take calls, in nanoseconds.
    pub latency: Histogram<u64>,
}

/// An identity that was granted more tokens than its policy allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub identity: u64,
    pub admitted_tokens: u64,
    pub ceiling: u64,
}

struct WorkerTally {
    outcomes: Outcomes,
    admitted_tokens: HashMap<u64, u64>,
    latency: Histogram<u64>,
}

fn new_histogram() -> anyhow::Result<Histogram<u64>> {
    Histogram::new_with_bounds(1, 60_000_000_000, 3)
        .map_err(|e| anyhow!("creating latency histogram: {e:?}"))
}

/// Drives `registry` from `plan.workers` threads for `plan.duration`.
pub fn run(registry: &Registry, plan: &LoadPlan) -> anyhow::Result<LoadOutcome> {
    anyhow::ensure!(plan.identities > 0, "at least one identity is required");
    anyhow::ensure!(plan.workers > 0, "at least one worker is required");

    let barrier = Barrier::new(plan.workers + 1);

    let (elapsed, tallies) = thread::scope(|s| {
        let handles: Vec<_> = (0..plan.workers)
            .map(|worker| {
                let barrier = &barrier;
                s.spawn(move || work(registry, plan, worker, barrier))
            })
            .collect();

        barrier.wait();
        let start = Instant::now();
        let tallies: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().map_err(|_| anyhow!("load worker panicked")))
            .collect();
        (start.elapsed(), tallies)
    });

    let mut outcome = LoadOutcome {
        elapsed,
        outcomes: Outcomes::default(),
        admitted_tokens: HashMap::new(),
        latency: new_histogram()?,
    };
    for tally in tallies {
        let tally = tally??;
        outcome.outcomes.merge(&tally.outcomes);
        for (identity, tokens) in tally.admitted_tokens {
            *outcome.admitted_tokens.entry(identity).or_default() += tokens;
        }
        outcome
            .latency
            .add(&tally.latency)
            .map_err(|e| anyhow!("merging latency histograms: {e:?}"))?;
    }
    Ok(outcome)
}

fn work(
    registry: &Registry,
    plan: &LoadPlan,
    worker: usize,
    barrier: &Barrier,
) -> anyhow::Result<WorkerTally> {
    let mut rng = StdRng::seed_from_u64(plan.seed.wrapping_add(worker as u64));
    let mut tally = WorkerTally {
        outcomes: Outcomes::default(),
        admitted_tokens: HashMap::new(),
        latency: new_histogram()?,
    };

    barrier.wait();
    let stop = Instant::now() + plan.duration;

    while Instant::now() < stop {
        let identity = rng.random_range(0..plan.identities);

        let started = Instant::now();
        let flow = registry.take_n(identity, plan.take);
        tally
            .latency
            .saturating_record(started.elapsed().as_nanos() as u64);

        if flow.is_continue() {
            *tally.admitted_tokens.entry(identity).or_default() += u64::from(plan.take);
        }
        tally.outcomes.record(flow);
    }

    debug!(worker, calls = tally.outcomes.total(), "worker finished");
    Ok(tally)
}

impl LoadOutcome {
    /// Most tokens any single identity may be granted during this run: a full
    /// bucket on first access plus everything that could accrue afterwards.
    ///
    /// One extra millisecond covers the truncation of the limiter's clock.
    pub fn ceiling(&self, limiter: &TokenBucketLimiter) -> u64 {
        let elapsed_ms = self.elapsed.as_millis() as f64 + 1.0;
        u64::from(limiter.burst()) + (limiter.refill_per_ms() * elapsed_ms) as u64
    }

    pub fn violations(&self, limiter: &TokenBucketLimiter) -> Vec<Violation> {
        let ceiling = self.ceiling(limiter);
        let mut violations: Vec<_> = self
            .admitted_tokens
            .iter()
            .filter(|(_, tokens)| **tokens > ceiling)
            .map(|(identity, tokens)| Violation {
                identity: *identity,
                admitted_tokens: *tokens,
                ceiling,
            })
            .collect();
        violations.sort_by_key(|violation| violation.identity);
        violations
    }

    pub fn report(&self, name: &str) {
        let throughput = self.outcomes.total() as f64 / self.elapsed.as_secs_f64();
        let goodput = self.outcomes.admitted as f64 / self.elapsed.as_secs_f64();

        println!("--- {} ---", name);
        println!("Total Duration:  {:.2?}", self.elapsed);
        println!(
            "Admitted/Total:  {}/{}",
            self.outcomes.admitted,
            self.outcomes.total()
        );
        println!("Total Rate:      {:.2} takes/sec", throughput);
        println!("Admit Rate:      {:.2} takes/sec (Goodput)", goodput);
        println!("Identities Hit:  {}", self.admitted_tokens.len());

        if !self.latency.is_empty() {
            println!("P50 (Take):      {}ns", self.latency.value_at_quantile(0.5));
            println!("P99 (Take):      {}ns", self.latency.value_at_quantile(0.99));
            println!("Max (Take):      {}ns", self.latency.max());
        }

        let refused = self.outcomes.total() - self.outcomes.admitted;
        println!("Refused:         {}", refused);
        if refused > 0 {
            println!("  └─ Exhausted:  {}", self.outcomes.exhausted);
            println!("  └─ Contended:  {}", self.outcomes.contended);
            if self.outcomes.oversized > 0 {
                println!("  └─ Oversized:  {}", self.outcomes.oversized);
            }
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(identities: u64, take: u16) -> LoadPlan {
        LoadPlan {
            identities,
            workers: 4,
            duration: Duration::from_millis(50),
            take,
            seed: 7,
        }
    }

    #[test]
    fn it_holds_every_identity_to_its_ceiling() {
        let registry = Registry::new(TokenBucketLimiter::new(5, Duration::from_secs(10)));
        let outcome = run(&registry, &plan(8, 1)).unwrap();

        assert!(outcome.violations(registry.limiter()).is_empty());
        assert!(outcome.outcomes.admitted > 0);
        assert!(outcome.outcomes.exhausted > 0);
        assert_eq!(outcome.outcomes.oversized, 0);
        assert_eq!(outcome.latency.len(), outcome.outcomes.total());
        assert_eq!(
            outcome.admitted_tokens.values().sum::<u64>(),
            outcome.outcomes.admitted
        );
    }

    #[test]
    fn it_counts_oversized_takes() {
        let registry = Registry::new(TokenBucketLimiter::new(2, Duration::from_secs(1)));
        let outcome = run(&registry, &plan(4, 3)).unwrap();

        assert_eq!(outcome.outcomes.admitted, 0);
        assert_eq!(outcome.outcomes.oversized, outcome.outcomes.total());
        assert!(outcome.admitted_tokens.is_empty());
    }

    #[test]
    fn it_flags_identities_over_the_ceiling() {
        let limiter = TokenBucketLimiter::new(10, Duration::from_secs(1));
        let outcome = LoadOutcome {
            elapsed: Duration::from_millis(999),
            outcomes: Outcomes::default(),
            admitted_tokens: HashMap::from([(1, 20), (2, 21), (3, 5)]),
            latency: new_histogram().unwrap(),
        };

        // 10 up front plus 1000ms at 0.01 tokens/ms.
        assert_eq!(outcome.ceiling(&limiter), 20);
        assert_eq!(
            outcome.violations(&limiter),
            vec![Violation {
                identity: 2,
                admitted_tokens: 21,
                ceiling: 20,
            }]
        );
    }

    #[test]
    fn it_rejects_empty_plans() {
        let registry = Registry::new(TokenBucketLimiter::per_second(1));
        let mut empty = plan(0, 1);
        assert!(run(&registry, &empty).is_err());

        empty.identities = 1;
        empty.workers = 0;
        assert!(run(&registry, &empty).is_err());
    }
}
