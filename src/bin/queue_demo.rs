//! Real-time Queue Demo for the Rust Timing Queue
//!
//! Drives queues from a realtime ticker and prints what their callbacks do.
//!
//! Usage:
//!   cargo run --bin queue_demo -- --list           # List demo scenarios
//!   cargo run --bin queue_demo -- --test 1         # Run scenario 1
//!   cargo run --bin queue_demo -- --test 2 --rate 4  # Run scenario 2 four times faster
//!
//! Set RUST_LOG=debug to watch playback transitions.
//!
//! Scenarios:
//!   1. Sequence     - Delays, a fade loop driven by delta_time, then a callback
//!   2. Ping-pong    - Yoyo + repeat bouncing a marker across a track
//!   3. Nested waits - A parent blocking on two child queues, then stopping them
//!   4. Command feed - A script feeding a consuming queue and awaiting it
//!   5. Wait until   - Blocking on a predicate toggled by another queue

use rust_timing_queue::{ease, Handler, QueueError, Ticker, TickerConfig};
use std::cell::{Cell, RefCell};
use std::env;
use std::rc::Rc;
use std::time::{Duration, Instant};

const SCENARIOS: [&str; 5] = [
    "Sequence     - Delays, a fade loop driven by delta_time, then a callback",
    "Ping-pong    - Yoyo + repeat bouncing a marker across a track",
    "Nested waits - A parent blocking on two child queues, then stopping them",
    "Command feed - A script feeding a consuming queue and awaiting it",
    "Wait until   - Blocking on a predicate toggled by another queue",
];

/// Print a line stamped with ticker time.
fn say(ticker: &Ticker, msg: &str) {
    println!("[{:7.3}s] {}", ticker.now(), msg);
}

/// Run the ticker until `done` or the wall-clock deadline.
fn run_for(ticker: &Ticker, limit: Duration, done: impl Fn() -> bool) -> Result<(), QueueError> {
    let start = Instant::now();
    ticker.run_until(|| done() || start.elapsed() >= limit)
}

// ============================================================================
// Scenario 1: Sequence
// Demonstrates: One-shot delays, a finite loop with t and delta_time, ordering
// ============================================================================

fn run_sequence(ticker: &Ticker) -> Result<(), QueueError> {
    println!("\n=== Scenario 1: Sequence ===");
    println!("Wait, fade 0 -> 100 over 2s, then report\n");

    let q = ticker.queue();
    let value = Rc::new(Cell::new(0.0));

    let t = ticker.clone();
    q.add(0.5, move || say(&t, "start"));

    let (t, v) = (ticker.clone(), value.clone());
    let mut last_print = -1.0;
    q.loop_for(2.0, move |h: &mut Handler| {
        v.set(v.get() + (100.0 - v.get()) * h.delta_time());
        if h.time_since_start() - last_print >= 0.25 || h.t() >= 1.0 {
            last_print = h.time_since_start();
            say(
                &t,
                &format!(
                    "t={:.2} linear={:6.2} smooth={:6.2}",
                    h.t(),
                    v.get(),
                    100.0 * ease::smoothstep(h.t())
                ),
            );
        }
    });

    let (t, v) = (ticker.clone(), value.clone());
    q.then(move || say(&t, &format!("done, value = {:.3}", v.get())));

    let done = q.clone();
    run_for(ticker, Duration::from_secs(10), move || done.is_completed())
}

// ============================================================================
// Scenario 2: Ping-pong
// Demonstrates: Yoyo bouncing, repeat, a live direction readout
// ============================================================================

fn run_ping_pong(ticker: &Ticker) -> Result<(), QueueError> {
    println!("\n=== Scenario 2: Ping-pong ===");
    println!("A marker sweeping back and forth for three round trips\n");

    const WIDTH: usize = 40;
    let q = ticker.queue();
    let trips = Rc::new(Cell::new(0));

    let t = ticker.clone();
    let mut last_cell = usize::MAX;
    q.yoyo().repeat().loop_for(1.0, move |h: &mut Handler| {
        let cell = (ease::smootherstep(h.t()) * WIDTH as f64).round() as usize;
        if cell / 4 != last_cell / 4 {
            last_cell = cell;
            let mut track = vec!['.'; WIDTH + 1];
            track[cell.min(WIDTH)] = if h.is_reversed() { '<' } else { '>' };
            say(&t, &track.into_iter().collect::<String>());
        }
    });

    let tr = trips.clone();
    q.then(move || tr.set(tr.get() + 1));

    let done = trips.clone();
    run_for(ticker, Duration::from_secs(15), move || done.get() >= 6)?;
    q.stop();
    println!("\nStopped after {} edges", trips.get());
    Ok(())
}

// ============================================================================
// Scenario 3: Nested waits
// Demonstrates: Handler::wait_for, the wait graph, stop propagation
// ============================================================================

fn run_nested_waits(ticker: &Ticker) -> Result<(), QueueError> {
    println!("\n=== Scenario 3: Nested waits ===");
    println!("Parent waits for a fast child, then blocks on a slow one until stopped\n");

    let parent = ticker.queue();
    let fast = ticker.queue();
    let slow = ticker.queue();

    let t = ticker.clone();
    fast.pause().add(0.5, move || say(&t, "fast child done"));

    let t = ticker.clone();
    let mut beats = 0;
    slow.pause().loop_forever(move |h: &mut Handler| {
        if h.time_since_start() >= beats as f64 * 0.5 {
            beats += 1;
            say(&t, &format!("slow child still busy ({})", beats));
        }
    });

    let (t, f, s) = (ticker.clone(), fast.clone(), slow.clone());
    parent.then_with(move |h| {
        say(&t, "parent starts both children");
        f.play();
        s.play();
        h.wait_for(&f);
    });
    let t = ticker.clone();
    parent.then(move || say(&t, "parent saw the fast child finish, now blocks on the slow one"));
    let s = slow.clone();
    parent.then_with(move |h| h.wait_for(&s));
    let t = ticker.clone();
    parent.then(move || say(&t, "unreachable: the parent is stopped first"));

    let stopper = ticker.queue();
    let (t, p) = (ticker.clone(), parent.clone());
    stopper.add(3.0, move || {
        say(&t, "stopping the parent");
        p.stop();
    });

    let (p, s) = (parent.clone(), slow.clone());
    run_for(ticker, Duration::from_secs(10), move || {
        !p.is_playing() && !s.is_playing()
    })?;
    println!(
        "\nparent playing: {}, slow child playing: {}",
        parent.is_playing(),
        slow.is_playing()
    );
    Ok(())
}

// ============================================================================
// Scenario 4: Command feed
// Demonstrates: Consume, a script awaiting wait_for_completion
// ============================================================================

fn run_command_feed(ticker: &Ticker) -> Result<(), QueueError> {
    println!("\n=== Scenario 4: Command feed ===");
    println!("A script pushes batches of commands and awaits each batch\n");

    let commands = ticker.queue();
    commands.consume();
    let finished = Rc::new(Cell::new(false));

    let (q, t, fin) = (commands.clone(), ticker.clone(), finished.clone());
    ticker.spawn(async move {
        for batch in 1..=3 {
            for n in 1..=3 {
                let t2 = t.clone();
                q.add(0.2, move || say(&t2, &format!("batch {} command {}", batch, n)));
            }
            say(&t, &format!("batch {} queued ({} pending)", batch, q.count()));
            q.wait_for_completion().await;
            say(&t, &format!("batch {} drained ({} left)", batch, q.count()));
        }
        fin.set(true);
    })?;

    let done = finished.clone();
    run_for(ticker, Duration::from_secs(10), move || done.get())
}

// ============================================================================
// Scenario 5: Wait until
// Demonstrates: Queue::wait_until, Handler::wait_until, predicates
// ============================================================================

fn run_wait_until(ticker: &Ticker) -> Result<(), QueueError> {
    println!("\n=== Scenario 5: Wait until ===");
    println!("One queue opens a gate after 1.5s; another blocks on it\n");

    let gate = Rc::new(Cell::new(false));
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let opener = ticker.queue();
    let (t, g) = (ticker.clone(), gate.clone());
    opener.add(1.5, move || {
        g.set(true);
        say(&t, "gate opened");
    });

    let waiter = ticker.queue();
    let t = ticker.clone();
    waiter.then(move || say(&t, "waiting on the gate"));
    let g = gate.clone();
    waiter.wait_until(move || g.get(), 0.1);
    let (t, l, g) = (ticker.clone(), log.clone(), gate.clone());
    waiter.then_with(move |h| {
        l.borrow_mut().push("through");
        say(&t, "through the gate; waiting again through the handler");
        let g = g.clone();
        h.wait_until(move || g.get(), 0.1);
    });
    let (t, l) = (ticker.clone(), log.clone());
    waiter.then(move || {
        l.borrow_mut().push("done");
        say(&t, "done");
    });

    let w = waiter.clone();
    run_for(ticker, Duration::from_secs(10), move || w.is_completed())?;
    println!("\nlog: {:?}", log.borrow());
    Ok(())
}

fn print_usage() {
    println!("Rust Timing Queue - Real-time Demo");
    println!("==================================");
    println!();
    println!("Usage:");
    println!("  cargo run --bin queue_demo -- --list            # List scenarios");
    println!("  cargo run --bin queue_demo -- --test T          # Run scenario T");
    println!("  cargo run --bin queue_demo -- --test T --rate R # Run at R times realtime");
    println!();
    println!("Scenarios:");
    for (i, desc) in SCENARIOS.iter().enumerate() {
        println!("  {}: {}", i + 1, desc);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let mut list = false;
    let mut test_case: Option<usize> = None;
    let mut rate = 1.0;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--list" | "-l" => {
                list = true;
            }
            "--test" | "-t" => {
                i += 1;
                if i < args.len() {
                    test_case = args[i].parse().ok();
                }
            }
            "--rate" | "-r" => {
                i += 1;
                if i < args.len() {
                    rate = args[i].parse().unwrap_or(1.0);
                }
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    if list {
        print_usage();
        return Ok(());
    }

    let test_case = match test_case {
        Some(t) if (1..=SCENARIOS.len()).contains(&t) => t,
        Some(t) => {
            return Err(format!("Invalid scenario {}. Must be 1-{}.", t, SCENARIOS.len()).into());
        }
        None => {
            print_usage();
            return Err("Missing --test argument".into());
        }
    };

    let ticker = Ticker::with_config(TickerConfig {
        fps: 60.0,
        rate,
    });

    match test_case {
        1 => run_sequence(&ticker)?,
        2 => run_ping_pong(&ticker)?,
        3 => run_nested_waits(&ticker)?,
        4 => run_command_feed(&ticker)?,
        5 => run_wait_until(&ticker)?,
        _ => unreachable!(),
    }

    println!("\nDemo complete. Goodbye!");
    Ok(())
}
