use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use kerb::engine::{Engine, EngineError};
use kerb::model::*;
use kerb::notify::NotifyHub;

const HOUR: i64 = 3_600_000; // 1 hour in ms

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

fn always_open() -> WeekSchedule {
    let mut s = WeekSchedule::closed();
    for day in 0..7 {
        s.days[day] = vec![TimeRange::new(0, 1440)];
    }
    s
}

fn fresh_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join("kerb_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{}.wal", Ulid::new()));
    Arc::new(Engine::new(path, Arc::new(NotifyHub::new())).unwrap())
}

async fn setup_space(engine: &Engine) -> Ulid {
    let space_id = engine
        .register_space(Ulid::new(), None, 500, always_open())
        .await
        .unwrap();
    engine
        .add_rule(
            space_id,
            RuleKind::MinDuration { min_ms: 12 * HOUR },
            1.1,
        )
        .await
        .unwrap();
    engine
        .add_rule(space_id, RuleKind::Discount, 5.0)
        .await
        .unwrap();
    space_id
}

/// Phase 1: sequential admissions on a single space.
async fn phase1_sequential(base: i64) {
    let engine = fresh_engine();
    let space_id = setup_space(&engine).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = base + (i as i64) * HOUR;
        let t = Instant::now();
        engine
            .request_booking(space_id, Ulid::new(), Span::new(s, s + HOUR))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    println!(
        "  throughput: {:.0} admissions/s",
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("sequential admission", &mut latencies);
}

/// Phase 2: parallel admissions across independent spaces.
async fn phase2_parallel_spaces(base: i64) {
    let engine = fresh_engine();
    let workers = 8;
    let per_worker = 250;

    let mut spaces = Vec::new();
    for _ in 0..workers {
        spaces.push(setup_space(&engine).await);
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for space_id in spaces {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(per_worker);
            for i in 0..per_worker {
                let s = base + (i as i64) * HOUR;
                let t = Instant::now();
                engine
                    .request_booking(space_id, Ulid::new(), Span::new(s, s + HOUR))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let elapsed = start.elapsed();
    println!(
        "  throughput: {:.0} admissions/s across {workers} spaces",
        (workers * per_worker) as f64 / elapsed.as_secs_f64()
    );
    print_latency("parallel admission", &mut all);
}

/// Phase 3: contention — many workers race for the same slots; the
/// exclusivity section must admit each slot exactly once.
async fn phase3_contention(base: i64) {
    let engine = fresh_engine();
    let space_id = setup_space(&engine).await;
    let workers: u32 = 16;
    let slots: u32 = 100;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..workers {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut admitted = 0u32;
            let mut conflicts = 0u32;
            for i in 0..slots {
                let s = base + (i as i64) * HOUR;
                match engine
                    .request_booking(space_id, Ulid::new(), Span::new(s, s + HOUR))
                    .await
                {
                    Ok(_) => admitted += 1,
                    Err(EngineError::Conflict(_)) => conflicts += 1,
                    Err(e) => panic!("unexpected error under contention: {e}"),
                }
            }
            (admitted, conflicts)
        }));
    }

    let mut admitted = 0u32;
    let mut conflicts = 0u32;
    for h in handles {
        let (a, c) = h.await.unwrap();
        admitted += a;
        conflicts += c;
    }
    let elapsed = start.elapsed();

    println!(
        "  {workers} workers × {slots} slots in {:.2}s: {admitted} admitted, {conflicts} conflicts",
        elapsed.as_secs_f64()
    );
    assert_eq!(admitted, slots, "each slot must be admitted exactly once");
    assert_eq!(conflicts, (workers - 1) * slots);
}

#[tokio::main]
async fn main() {
    // Spans must be in the future; a day of margin keeps phases stable.
    let base = now_ms() + 24 * HOUR;

    println!("phase 1: sequential single-space admissions");
    phase1_sequential(base).await;

    println!("phase 2: parallel independent spaces");
    phase2_parallel_spaces(base).await;

    println!("phase 3: contended single space");
    phase3_contention(base).await;
}
