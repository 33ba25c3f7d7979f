//! Offline replay - run recorded fixes through the engine
//!
//! Reads regions (JSON array of region specs) and fixes (JSONL, same payload
//! as the MQTT topic), evaluates them on a manual clock and prints every
//! notification as a JSON line on stdout. Logs go to stderr.
//!
//! Usage:
//!   cargo run --bin geofence-replay -- --regions regions.json --fixes track.jsonl --tick-ms 250

use anyhow::Context;
use clap::Parser;
use geofence_engine::domain::types::{PositionFix, RegionSpec, TransitionEvent};
use geofence_engine::infra::{Clock, Config, ManualClock, Metrics};
use geofence_engine::io::{create_notify_channel, parse_fix_payload, Notification};
use geofence_engine::services::GeofenceEngine;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "geofence-replay")]
#[command(about = "Replay recorded position fixes against a set of regions")]
struct Args {
    /// JSON file with an array of regions
    #[arg(short, long)]
    regions: String,

    /// JSONL file with one fix (or array of fixes) per line
    #[arg(short, long)]
    fixes: String,

    /// Optional config file (site id, accuracy gate)
    #[arg(short, long)]
    config: Option<String>,

    /// Simulated tick period between fixes (0 disables ticks)
    #[arg(long, default_value = "0")]
    tick_ms: u64,
}

fn read_fixes(path: &str) -> anyhow::Result<Vec<PositionFix>> {
    let file = fs::File::open(path).with_context(|| format!("Failed to open fixes file {}", path))?;
    let mut fixes = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Untimestamped fixes are placed 1 s after the previous one
        let fallback_ts = fixes.last().map_or(0, |f: &PositionFix| f.timestamp_ms + 1000);
        match parse_fix_payload(line, fallback_ts) {
            Ok(parsed) => fixes.extend(parsed),
            Err(e) => warn!(line = %(line_no + 1), error = %e, "fix_line_skipped"),
        }
    }
    Ok(fixes)
}

/// Ticks skipped over a gap beyond this many intervals, jumping to the next deadline
const MAX_CATCHUP_TICKS: u64 = 1_000;

/// Engine on a manual clock with an optional tick grid
struct Replay {
    engine: GeofenceEngine,
    clock: Arc<ManualClock>,
    notify_rx: mpsc::Receiver<TransitionEvent>,
    tick_ms: u64,
    next_tick: u64,
}

impl Replay {
    fn new(config: &Config, specs: Vec<RegionSpec>, start_ms: u64, tick_ms: u64) -> Self {
        let clock = Arc::new(ManualClock::new(start_ms));
        let engine_clock: Arc<dyn Clock> = clock.clone();
        let (notify_tx, notify_rx) = create_notify_channel(config.notify_queue_size());
        let mut engine = GeofenceEngine::new(config, engine_clock, notify_tx, Arc::new(Metrics::new()));

        for spec in specs {
            let id = spec.id.clone();
            if let Err(e) = engine.register(spec) {
                warn!(region_id = %id, error = %e, "region_rejected");
            }
        }

        Self { engine, clock, notify_rx, tick_ms, next_tick: start_ms.saturating_add(tick_ms) }
    }

    fn drain(&mut self) -> Vec<TransitionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.notify_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Earliest pending dwell deadline or region expiry
    fn next_due(&self) -> Option<u64> {
        self.engine
            .status()
            .regions
            .iter()
            .flat_map(|r| [r.dwell_deadline_ms, r.region.expires_at_ms])
            .flatten()
            .min()
    }

    /// Run grid ticks strictly before `until_ms`
    fn tick_until(&mut self, until_ms: u64) -> Vec<TransitionEvent> {
        let mut events = Vec::new();
        if self.tick_ms == 0 {
            return events;
        }

        while self.next_tick < until_ms {
            if until_ms - self.next_tick > MAX_CATCHUP_TICKS * self.tick_ms {
                // Between fixes only deadlines and expiries can fire
                let target = self.next_due().filter(|due| *due < until_ms).unwrap_or(until_ms);
                if target > self.next_tick {
                    let steps = (target - self.next_tick).div_ceil(self.tick_ms);
                    self.next_tick += steps * self.tick_ms;
                }
                if self.next_tick >= until_ms {
                    break;
                }
            }

            self.clock.set(self.next_tick);
            self.engine.on_tick(self.next_tick);
            events.extend(self.drain());
            self.next_tick += self.tick_ms;
        }
        events
    }

    fn fix(&mut self, fix: &PositionFix) -> Vec<TransitionEvent> {
        let mut events = self.tick_until(fix.timestamp_ms);
        if fix.timestamp_ms > self.clock.now_ms() {
            self.clock.set(fix.timestamp_ms);
        }
        if let Err(e) = self.engine.on_fix(fix) {
            warn!(ts = %fix.timestamp_ms, error = %e, "fix_rejected");
        }
        events.extend(self.drain());
        events
    }

    /// Tick past dwell deadlines still pending after the last fix
    fn finish(&mut self) -> Vec<TransitionEvent> {
        let pending = self.engine.status().regions.iter().filter_map(|r| r.dwell_deadline_ms).max();
        match pending {
            Some(deadline) if self.tick_ms > 0 => self.tick_until(deadline.saturating_add(self.tick_ms)),
            _ => Vec::new(),
        }
    }
}

fn print_notifications(events: Vec<TransitionEvent>, site: &str) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for event in events {
        let _ = writeln!(out, "{}", Notification::from_event(event, site).to_json());
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let region_json =
        fs::read_to_string(&args.regions).with_context(|| format!("Failed to read regions file {}", args.regions))?;
    let specs: Vec<RegionSpec> =
        serde_json::from_str(&region_json).with_context(|| format!("Failed to parse regions file {}", args.regions))?;
    let fixes = read_fixes(&args.fixes)?;

    // Start the clock at the first fix so relative expiries line up with the track
    let start_ms = fixes.first().map_or(0, |f| f.timestamp_ms);
    let mut replay = Replay::new(&config, specs, start_ms, args.tick_ms);
    info!(regions = %replay.engine.region_count(), fixes = %fixes.len(), "replay_started");

    for fix in &fixes {
        print_notifications(replay.fix(fix), config.site_id());
    }
    print_notifications(replay.finish(), config.site_id());

    let status = replay.engine.status();
    info!(
        regions = %status.regions.len(),
        last_fix_ms = ?status.last_fix_ms,
        "replay_finished"
    );
    Ok(())
}
