use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use hdrhistogram::Histogram;
use tracing_subscriber::EnvFilter;

use tiergate::{
    AdmissionDecision, EvictionIntervalMs, LimitScope, RateLimit, RateLimiter, RateLimiterOptions,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KeyDist {
    Hot,
    Uniform,
    Skewed,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Mode {
    Max,
    TargetQps,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tiergate-stress",
    about = "Load test / benchmark harness for tiergate"
)]
struct Args {
    #[arg(long, value_enum, default_value_t = KeyDist::Skewed)]
    key_dist: KeyDist,

    #[arg(long, value_enum, default_value_t = Mode::Max)]
    mode: Mode,

    #[arg(long, default_value_t = 8)]
    threads: usize,

    #[arg(long, default_value_t = 10)]
    duration_s: u64,

    /// Events admitted per identifier per second.
    #[arg(long, default_value_t = 10)]
    per_identifier_limit: u64,

    /// Events admitted across all identifiers per second.
    #[arg(long, default_value_t = 10_000)]
    account_limit: u64,

    /// Run the background eviction loop at this interval during the test.
    #[arg(long)]
    eviction_interval_ms: Option<u64>,

    #[arg(long, default_value_t = 100_000)]
    key_space: usize,

    #[arg(long, default_value_t = 0.8)]
    hot_fraction: f64,

    #[arg(long, default_value_t = 100)]
    sample_every: u64,

    #[arg(long)]
    target_qps: Option<u64>,

    #[arg(long)]
    burst_qps: Option<u64>,

    #[arg(long, default_value_t = 30_000)]
    burst_period_ms: u64,

    #[arg(long, default_value_t = 5_000)]
    burst_duration_ms: u64,
}

#[derive(Default)]
struct Counts {
    admitted: AtomicU64,
    identifier_rejected: AtomicU64,
    account_rejected: AtomicU64,
}

fn build_options(args: &Args) -> Result<RateLimiterOptions, tiergate::TiergateError> {
    Ok(RateLimiterOptions {
        per_identifier_limit: RateLimit::try_from(args.per_identifier_limit)?,
        account_limit: RateLimit::try_from(args.account_limit)?,
        eviction_interval_ms: match args.eviction_interval_ms {
            Some(ms) => EvictionIntervalMs::try_from(ms)?,
            None => EvictionIntervalMs::default(),
        },
    })
}

fn build_keys(args: &Args) -> Vec<String> {
    let n = match args.key_dist {
        KeyDist::Hot => 1,
        _ => args.key_space.max(1),
    };
    (0..n).map(|i| format!("+1555{i:07}")).collect()
}

fn new_histogram() -> Result<Histogram<u64>, hdrhistogram::CreationError> {
    Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)
}

fn should_sample(iter: u64, sample_every: u64) -> bool {
    if sample_every <= 1 {
        return true;
    }

    iter.is_multiple_of(sample_every)
}

fn qps_for_now(args: &Args, started: Instant) -> Option<u64> {
    if args.mode == Mode::Max {
        return None;
    }

    let base = args.target_qps?;

    if let Some(burst_qps) = args.burst_qps {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let in_period = elapsed_ms % args.burst_period_ms.max(1);
        if in_period < args.burst_duration_ms {
            return Some(burst_qps);
        }
    }

    Some(base)
}

fn pick_key<'a>(args: &Args, keys: &'a [String], thread_rng: &mut impl FnMut() -> u64) -> &'a str {
    match args.key_dist {
        KeyDist::Hot => &keys[0],
        KeyDist::Uniform => {
            let idx = (thread_rng() as usize) % keys.len();
            &keys[idx]
        }
        KeyDist::Skewed => {
            let r = (thread_rng() % 10_000) as f64 / 10_000.0;
            if r < args.hot_fraction {
                &keys[0]
            } else {
                let idx = 1 + ((thread_rng() as usize) % (keys.len().saturating_sub(1).max(1)));
                &keys[idx % keys.len()]
            }
        }
    }
}

/// Windows in the history whose totals exceed a ceiling. Should always be empty.
struct CeilingViolations {
    windows: usize,
    account: usize,
    identifier: usize,
    max_account: u64,
    max_identifier: u64,
}

impl CeilingViolations {
    fn is_clean(&self) -> bool {
        self.account == 0 && self.identifier == 0
    }
}

fn check_ceilings(rl: &RateLimiter, args: &Args) -> CeilingViolations {
    let account_counts = rl.account_counts();
    let per_identifier = rl.per_identifier_counts();

    // History files an event under its identifier's tick. An event whose
    // account increment landed one window later is still filed under the
    // earlier window, and each worker has at most one such event per boundary.
    let account_ceiling = args.account_limit + args.threads as u64;
    let account = account_counts
        .iter()
        .filter(|w| w.count > account_ceiling)
        .count();
    let identifier = per_identifier
        .iter()
        .flat_map(|w| &w.identifiers)
        .filter(|c| c.count > args.per_identifier_limit)
        .count();

    CeilingViolations {
        windows: account_counts.len(),
        account,
        identifier,
        max_account: account_counts.iter().map(|w| w.count).max().unwrap_or(0),
        max_identifier: per_identifier
            .iter()
            .flat_map(|w| &w.identifiers)
            .map(|c| c.count)
            .max()
            .unwrap_or(0),
    }
}

fn print_results(
    args: &Args,
    elapsed: Duration,
    ops: u64,
    hist: &Histogram<u64>,
    counts: &Counts,
    ceilings: &CeilingViolations,
) {
    let ops_s = ops as f64 / elapsed.as_secs_f64();

    println!(
        "mode={:?} key_dist={:?} key_space={}",
        args.mode, args.key_dist, args.key_space
    );
    println!(
        "threads={} duration_s={} per_identifier_limit={} account_limit={}",
        args.threads, args.duration_s, args.per_identifier_limit, args.account_limit
    );
    println!(
        "elapsed_s={:.3} ops={} ops_per_s={:.0}",
        elapsed.as_secs_f64(),
        ops,
        ops_s
    );
    println!(
        "admitted={} identifier_rejected={} account_rejected={}",
        counts.admitted.load(Ordering::Relaxed),
        counts.identifier_rejected.load(Ordering::Relaxed),
        counts.account_rejected.load(Ordering::Relaxed),
    );
    println!(
        "windows={} max_account_per_window={} max_identifier_per_window={}",
        ceilings.windows, ceilings.max_account, ceilings.max_identifier
    );
    println!(
        "account_ceiling_violations={} identifier_ceiling_violations={}",
        ceilings.account, ceilings.identifier
    );
    if !hist.is_empty() {
        println!(
            "lat_us p50={} p95={} p99={} p999={} max={}",
            hist.value_at_quantile(0.50),
            hist.value_at_quantile(0.95),
            hist.value_at_quantile(0.99),
            hist.value_at_quantile(0.999),
            hist.max()
        );
        println!("sample_every={} samples={}", args.sample_every, hist.len());
    } else {
        println!("no latency samples collected");
    }
}

fn run(args: Args) -> Result<bool, Box<dyn Error>> {
    let keys = Arc::new(build_keys(&args));
    let rl = Arc::new(RateLimiter::new(build_options(&args)?));

    tracing::info!(
        mode = ?args.mode,
        key_dist = ?args.key_dist,
        key_space = keys.len(),
        threads = args.threads,
        duration_s = args.duration_s,
        per_identifier_limit = args.per_identifier_limit,
        account_limit = args.account_limit,
        "starting stress run"
    );

    if let Some(ms) = args.eviction_interval_ms {
        tracing::info!(interval_ms = ms, "running eviction loop");
        rl.run_eviction_loop();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let counts = Arc::new(Counts::default());
    let total_ops = Arc::new(AtomicU64::new(0));

    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.duration_s);

    let mut handles = Vec::with_capacity(args.threads);
    for t in 0..args.threads {
        let rl = Arc::clone(&rl);
        let keys = Arc::clone(&keys);
        let stop = Arc::clone(&stop);
        let counts = Arc::clone(&counts);
        let total_ops = Arc::clone(&total_ops);
        let args = args.clone();
        let mut hist = new_histogram()?;

        handles.push(std::thread::spawn(move || {
            let mut i = 0_u64;
            let mut seed = (t as u64 + 1) * 0x9E37_79B9_7F4A_7C15;
            let mut next_deadline = Instant::now();

            let mut rng_u64 = || {
                // xorshift64*
                seed ^= seed >> 12;
                seed ^= seed << 25;
                seed ^= seed >> 27;
                seed = seed.wrapping_mul(0x2545_F491_4F6C_DD1D);
                seed
            };

            while !stop.load(Ordering::Relaxed) {
                if Instant::now() >= deadline {
                    break;
                }

                if let Some(qps) = qps_for_now(&args, started) {
                    let per_op_ns = 1_000_000_000u64 / qps.max(1);
                    let now = Instant::now();
                    if now < next_deadline {
                        std::thread::sleep(next_deadline - now);
                    }
                    next_deadline += Duration::from_nanos(per_op_ns);
                }

                i = i.wrapping_add(1);
                let k = pick_key(&args, &keys, &mut rng_u64);
                let t0 = should_sample(i, args.sample_every).then(Instant::now);

                let decision = rl.check(k);

                if let Some(t0) = t0 {
                    let us = t0.elapsed().as_micros() as u64;
                    let _ = hist.record(us.max(1));
                }

                total_ops.fetch_add(1, Ordering::Relaxed);
                let counter = match decision {
                    AdmissionDecision::Admitted { .. } => &counts.admitted,
                    AdmissionDecision::Rejected {
                        scope: LimitScope::Identifier,
                    } => &counts.identifier_rejected,
                    AdmissionDecision::Rejected {
                        scope: LimitScope::Account,
                    } => &counts.account_rejected,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }

            hist
        }));
    }

    std::thread::sleep(Duration::from_secs(args.duration_s));
    stop.store(true, Ordering::Relaxed);

    let mut merged = new_histogram()?;
    for h in handles {
        let hist = h.join().map_err(|_| "worker thread panicked")?;
        merged.add(&hist)?;
    }

    rl.stop_eviction_loop();

    let elapsed = started.elapsed();
    let ops = total_ops.load(Ordering::Relaxed);
    let ceilings = check_ceilings(&rl, &args);
    print_results(&args, elapsed, ops, &merged, &counts, &ceilings);

    tracing::info!(
        elapsed_ms = elapsed.as_millis() as u64,
        ops,
        admitted = counts.admitted.load(Ordering::Relaxed),
        windows = ceilings.windows,
        tracked_identifiers = rl.tracked_identifiers(),
        "stress run finished"
    );

    Ok(ceilings.is_clean())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if !run(args)? {
        tracing::error!("ceiling violated");
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["tiergate-stress"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn short_run_stays_under_both_ceilings() {
        let args = args(&[
            "--threads",
            "2",
            "--duration-s",
            "1",
            "--key-space",
            "16",
            "--per-identifier-limit",
            "3",
            "--account-limit",
            "20",
        ]);

        assert!(run(args).unwrap());
    }

    #[test]
    fn ceilings_summarize_recorded_history() {
        let args = args(&["--per-identifier-limit", "1", "--account-limit", "1"]);
        let rl = RateLimiter::new(build_options(&args).unwrap());

        assert!(rl.check_and_record("+15550000001"));
        assert!(!rl.check_and_record("+15550000001"));

        let ceilings = check_ceilings(&rl, &args);
        assert!(ceilings.is_clean());
        assert_eq!(ceilings.windows, 1);
        assert_eq!(ceilings.max_identifier, 1);
    }

    #[test]
    fn invalid_limit_is_rejected() {
        let args = args(&["--per-identifier-limit", "0"]);
        assert!(build_options(&args).is_err());
    }
}
