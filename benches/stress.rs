use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};

const HOUR: i64 = 3_600_000; // 1 hour in ms
const DAY: i64 = 24 * HOUR;

async fn connect(host: &str, port: u16) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("roombook")
        .user("roombook");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// Names and time slots unique to this run, so repeated runs against one
/// server never collide.
#[derive(Clone)]
struct Run {
    tag: i64,
    base: i64,
}

impl Run {
    fn new() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            tag: now,
            // Tomorrow, on an hour boundary
            base: (now / HOUR + 24) * HOUR,
        }
    }

    fn slot(&self, day: i64, hour: i64) -> (i64, i64) {
        let start = self.base + day * DAY + hour * HOUR;
        (start, start + HOUR)
    }
}

async fn create_room(client: &Client, run: &Run, name: &str) -> i64 {
    let messages = client
        .simple_query(&format!(
            "INSERT INTO rooms (name) VALUES ('bench-{}-{name}')",
            run.tag
        ))
        .await
        .unwrap();
    messages
        .iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get("id").and_then(|id| id.parse().ok()),
            _ => None,
        })
        .expect("room insert returned no id")
}

async fn book(client: &Client, room: i64, (start, end): (i64, i64)) -> Result<(), tokio_postgres::Error> {
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (room_id, start_time, end_time) VALUES ({room}, {start}, {end})"
        ))
        .await
}

async fn phase1_sequential(host: &str, port: u16, run: &Run) {
    let client = connect(host, port).await;
    let room = create_room(&client, run, "sequential").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as i64 {
        let t = Instant::now();
        book(&client, room, run.slot(i / 24, i % 24)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent_rooms(host: &str, port: u16, run: &Run) {
    let n_tasks = 10;
    let n_per_task = 200i64;

    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let host = host.to_string();
        let run = run.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = create_room(&client, &run, &format!("parallel-{i}")).await;
            for j in 0..n_per_task {
                book(&client, room, run.slot(j / 24, j % 24)).await.unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks as i64 * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Every task tries every slot of one room; each slot must be won once.
async fn phase3_contention(host: &str, port: u16, run: &Run) {
    let n_tasks = 20;
    let n_slots = 100i64;

    let setup = connect(host, port).await;
    let room = create_room(&setup, run, "contended").await;
    drop(setup);

    let won = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let run = run.clone();
        let won = won.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(n_slots as usize);
            for slot in 0..n_slots {
                let t = Instant::now();
                match book(&client, room, run.slot(slot / 24, slot % 24)).await {
                    Ok(()) => {
                        won.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.code() == Some(&SqlState::EXCLUSION_VIOLATION) => {
                        conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }

    let won = won.load(Ordering::Relaxed);
    let conflicts = conflicts.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_slots} slots in {:.2}s: {won} booked, {conflicts} conflicts",
        start.elapsed().as_secs_f64()
    );
    if won as i64 != n_slots {
        println!("  !! expected exactly {n_slots} winners, got {won}");
    }
    print_latency("contended insert", &mut all_latencies);
}

async fn phase4_read_under_load(host: &str, port: u16, run: &Run) {
    let setup = connect(host, port).await;
    let room = create_room(&setup, run, "read-target").await;
    for i in 0..200i64 {
        book(&setup, room, run.slot(i / 24, i % 24)).await.unwrap();
    }
    drop(setup);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let run = run.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = create_room(&client, &run, &format!("writer-{w}")).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = book(&client, room, run.slot(i / 24, i % 24)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query(&format!("SELECT * FROM bookings WHERE room_id = {room}"))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("list bookings (200 rows)", &mut all_latencies);
}

async fn phase5_connection_storm(host: &str, port: u16, run: &Run) {
    let n_conns = 50;
    let ops_per_conn = 10i64;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let run = run.clone();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = create_room(&client, &run, &format!("storm-{c}")).await;
            for i in 0..ops_per_conn {
                book(&client, room, run.slot(0, i)).await.unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ROOMBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROOMBOOK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid ROOMBOOK_PORT");

    println!("=== roombook stress benchmark ===");
    println!("target: {host}:{port}\n");

    let run = Run::new();

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&host, port, &run).await;

    println!("\n[phase 2] concurrent writes, one room per task");
    phase2_concurrent_rooms(&host, port, &run).await;

    println!("\n[phase 3] contended writes on one room");
    phase3_contention(&host, port, &run).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(&host, port, &run).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port, &run).await;

    println!("\n=== benchmark complete ===");
}
