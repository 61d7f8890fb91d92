//! Basic usage example for the throttle crate.
//!
//! Run with `RUST_LOG=throttle=debug cargo run --example basic` to see the
//! library's own log output.

use std::thread;
use std::time::{Duration, Instant};
use throttle::{
    LimiterRegistry, Policy, RateLimiter, RateLimiterBuilder, RejectReason, Result,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Basic Throttle Example ===\n");

    // Example 1: Token bucket burst and rejection
    burst_example()?;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 2: Blocking acquire at a steady cadence
    cadence_example()?;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 3: Concurrency cap with worker threads
    concurrency_example()?;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 4: Warm-up ramp
    warmup_example()?;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 5: Per-client limits and metrics
    registry_example()?;

    Ok(())
}

fn burst_example() -> Result<()> {
    println!("1. Token Bucket Burst:");

    let limiter = RateLimiter::new(Policy::token_bucket(10, 2.0))?;
    println!("   Created limiter with a burst of 10, refilling 2 tokens/second");

    let mut successful = 0;
    let mut failed = 0;

    for i in 1..=15 {
        let decision = limiter.try_acquire();
        if decision.is_allowed() {
            successful += 1;
            println!("   Request {} - ✅ {}", i, decision);
        } else {
            failed += 1;
            println!("   Request {} - ❌ {}", i, decision);
        }
    }

    println!("   Results: {} successful, {} rate limited", successful, failed);
    Ok(())
}

fn cadence_example() -> Result<()> {
    println!("2. Steady Cadence (1 token/second):");

    let limiter = RateLimiter::new(Policy::token_bucket(1, 1.0))?;
    let start = Instant::now();

    for i in 1..=3 {
        let decision = limiter.acquire(Duration::from_secs(2));
        println!(
            "   Acquire {} at {:>6.3}s - {}",
            i,
            start.elapsed().as_secs_f64(),
            decision
        );
    }

    Ok(())
}

fn concurrency_example() -> Result<()> {
    println!("3. Concurrency Cap (3 permits, 8 workers):");

    let limiter = RateLimiterBuilder::new().concurrency().capacity(3).build()?;

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let limiter = limiter.clone();
            thread::spawn(move || match limiter.acquire(Duration::from_millis(150)) {
                decision if decision.is_allowed() => {
                    let _permit = decision.into_permit();
                    thread::sleep(Duration::from_millis(100));
                    println!("   Worker {} - ✅ done", worker);
                }
                decision => {
                    let reason = decision.reject_reason().unwrap_or(RejectReason::Overload);
                    println!("   Worker {} - ⏱️ {}", worker, reason);
                }
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }

    println!("   {}", limiter.metrics());
    Ok(())
}

fn warmup_example() -> Result<()> {
    println!("4. Warm-up Ramp (rate 20/s reached after 1s):");

    let limiter = RateLimiter::new(
        Policy::token_bucket(20, 20.0).with_warmup(Duration::from_secs(1)),
    )?;

    for step in 0..4 {
        thread::sleep(Duration::from_millis(250));
        if let Some(bucket) = limiter.token_bucket() {
            println!(
                "   t={:>4}ms  rate {:>5.2}/s  tokens {}",
                (step + 1) * 250,
                bucket.effective_rate(),
                bucket.available_tokens()
            );
        }
    }

    Ok(())
}

fn registry_example() -> Result<()> {
    println!("5. Per-Client Limits:");

    let registry = LimiterRegistry::new(Policy::token_bucket(3, 1.0))?;
    let scheduler = registry
        .limiter(&"client-a")
        .map(|limiter| limiter.start_refill_scheduler(Duration::from_millis(100)))
        .transpose()?;

    for client in ["client-a", "client-b"] {
        let allowed = (0..5)
            .filter(|_| registry.try_acquire(&client).is_allowed())
            .count();
        println!("   {} - {} of 5 requests allowed", client, allowed);
    }

    println!("{}", registry.stats());

    if let Some(scheduler) = scheduler {
        scheduler.stop()?;
    }
    Ok(())
}
