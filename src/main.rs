//! Onion exponent vanity CLI
//!
//! Searches public exponents of an existing RSA public key for an onion
//! identifier matching one of the given patterns.

use clap::Parser;
use crossbeam_channel::unbounded;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use onion_exp_vanity::backend::{
    select_backend, ExponentRange, Progress, SearchConfig, EXP_MAX, EXP_MIN,
};
use onion_exp_vanity::{list_devices, MessageBuffer, PatchMode, TargetSet};

#[derive(Parser)]
#[command(name = "oev")]
#[command(about = "Tor v2 onion vanity search over RSA public exponents")]
#[command(version)]
struct Cli {
    /// DER-encoded RSA public key, binary or hex
    #[arg(required_unless_present = "list_devices")]
    key: Option<PathBuf>,

    /// Target patterns (comma-separated); `.` matches any symbol, `[abc]` one of a set
    #[arg(short, long, value_delimiter = ',', required_unless_present = "list_devices")]
    patterns: Vec<String>,

    /// Smallest exponent to try
    #[arg(long, value_parser = parse_exponent, default_value_t = EXP_MIN)]
    min_exponent: u64,

    /// Largest exponent to try
    #[arg(long, value_parser = parse_exponent, default_value_t = EXP_MAX)]
    max_exponent: u64,

    /// Number of CPU threads
    #[arg(short = 't', long, default_value_t = num_cpus::get())]
    threads: usize,

    /// Start at a random exponent instead of the minimum
    #[arg(long)]
    random_start: bool,

    /// Patch exponents straight into hash blocks instead of the DER bytes
    #[arg(long)]
    block_words: bool,

    /// List compute devices and exit
    #[arg(long)]
    list_devices: bool,
}

/// Accept `0x`-prefixed hex or decimal
fn parse_exponent(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("'{}' is not an exponent: {}", s, e))
}

/// Pretty duration formatter
struct PrettyDur(chrono::Duration);

impl std::fmt::Display for PrettyDur {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.num_weeks() >= 52 {
            write!(f, "{} years, ", self.0.num_weeks() / 52)?;
        }
        if self.0.num_weeks() % 52 > 0 {
            write!(f, "{} weeks, ", self.0.num_weeks() % 52)?;
        }
        if self.0.num_days() % 7 > 0 {
            write!(f, "{} days, ", self.0.num_days() % 7)?;
        }
        if self.0.num_hours() % 24 > 0 {
            write!(f, "{} hours, ", self.0.num_hours() % 24)?;
        }
        if self.0.num_minutes() % 60 > 0 {
            write!(f, "{} minutes, ", self.0.num_minutes() % 60)?;
        }
        write!(f, "{} seconds", self.0.num_seconds() % 60)
    }
}

fn pretty_secs(secs: f64) -> PrettyDur {
    let std = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
    PrettyDur(chrono::Duration::from_std(std).unwrap_or(chrono::Duration::zero()))
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

/// Read a key file holding binary DER or hex text, padded or not
fn read_key(path: &Path) -> Result<MessageBuffer, String> {
    let raw = std::fs::read(path).map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
    let bytes = if raw.first() == Some(&0x30) {
        raw
    } else {
        let text: String = String::from_utf8_lossy(&raw)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        hex::decode(&text)
            .map_err(|e| format!("'{}' is neither DER nor hex: {}", path.display(), e))?
    };

    if let Ok(padded) = MessageBuffer::from_padded(bytes.clone()) {
        debug!(content_len = padded.content_len(), "key is already padded");
        return Ok(padded);
    }
    Ok(MessageBuffer::from_der(&bytes))
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    if cli.list_devices {
        for device in list_devices() {
            println!("{}", device);
        }
        return;
    }

    let range = match ExponentRange::new(cli.min_exponent, cli.max_exponent) {
        Ok(r) => r,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    // Validate patterns
    let targets = match TargetSet::parse(&cli.patterns) {
        Ok(t) => t,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let expected = targets
        .patterns()
        .iter()
        .map(|p| p.expected_trials())
        .fold(f64::INFINITY, f64::min);

    let Some(key_path) = cli.key.as_deref() else {
        error!("no key given");
        std::process::exit(1);
    };
    let key = match read_key(key_path) {
        Ok(k) => k,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    println!("=== Onion Exponent Vanity ===");
    println!("Patterns: {:?}", cli.patterns);
    println!("Key: {} ({} DER bytes)", key_path.display(), key.content_len());
    println!("Exponents: {:#x} ..= {:#x}", range.first(), range.last());
    println!("CPU threads: {}", cli.threads);
    println!();

    let backend = select_backend(cli.threads);

    let config = SearchConfig {
        key,
        patterns: cli.patterns.clone(),
        range,
        random_start: cli.random_start,
        mode: if cli.block_words {
            PatchMode::BlockWords
        } else {
            PatchMode::Der
        },
    };

    println!("Starting search...");
    println!();

    // Set up channels
    let (progress_tx, progress_rx) = unbounded::<Progress>();
    let (result_tx, result_rx) = unbounded();
    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);

    // Handle Ctrl+C
    ctrlc::set_handler(move || {
        eprintln!("\nStopping...");
        let _ = stop_tx.try_send(());
    })
    .ok();

    let gen_handle =
        std::thread::spawn(move || backend.generate(config, progress_tx, result_tx, stop_rx));

    let start_time = Instant::now();
    let mut last_log = Instant::now();
    let mut found_count = 0;
    let total_patterns = cli.patterns.len();

    loop {
        while let Ok(result) = result_rx.try_recv() {
            found_count += 1;
            println!(
                "FOUND [{}/{}]: {} -> {}",
                found_count,
                total_patterns,
                result.pattern,
                result.onion_address()
            );
            println!("  Exponent: {:#x}", result.exponent);
            println!("  Public key DER: {}", hex::encode(&result.der));
        }

        if let Ok(progress) = progress_rx.try_recv() {
            if last_log.elapsed() > Duration::from_secs(10) {
                let dur = progress.elapsed_secs;
                let progress_pct = progress.keys_checked as f64 / expected;
                let expected_dur = if progress_pct > 0.0 {
                    dur / progress_pct
                } else {
                    0.0
                };

                println!();
                println!(
                    "Progress: {:.2e} / {:.2e} keys ({:.4}%)",
                    progress.keys_checked as f64,
                    expected,
                    progress_pct * 100.0
                );
                println!("Speed: {:.2} M keys/sec", progress.keys_per_sec / 1_000_000.0);
                if progress.keys_rejected > 0 {
                    println!("Rejected: {} exponents", progress.keys_rejected);
                }
                println!(
                    "Elapsed: {} / Est. total: {}",
                    pretty_secs(dur),
                    pretty_secs(expected_dur)
                );
                println!("Found: {}/{} patterns", found_count, total_patterns);
                println!();

                last_log = Instant::now();
            }
        }

        if found_count >= total_patterns || gen_handle.is_finished() {
            break;
        }

        // Small sleep to prevent busy loop
        std::thread::sleep(Duration::from_millis(50));
    }

    match gen_handle.join() {
        Ok(Ok(())) => {
            // results sent just before the generator returned
            while let Ok(result) = result_rx.try_recv() {
                found_count += 1;
                println!("FOUND: {} -> {}", result.pattern, result.onion_address());
                println!("  Exponent: {:#x}", result.exponent);
                println!("  Public key DER: {}", hex::encode(&result.der));
            }
            println!();
            println!("=== Complete! ===");
            println!(
                "Found {}/{} patterns in {}",
                found_count,
                total_patterns,
                pretty_secs(start_time.elapsed().as_secs_f64())
            );
        }
        Ok(Err(e)) => {
            eprintln!();
            eprintln!("Search stopped: {}", e);
        }
        Err(_) => {
            eprintln!();
            eprintln!("Search thread panicked");
        }
    }
}
