/// Replay Trace Inspector - summarises a recorded replay log
///
/// Usage: cargo run --bin augur_replay <replay-log.jsonl>

use augur_core::CallType;
use augur_llm::replay::read_records;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("AUGUR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("augur_llm=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    init_tracing();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: cargo run --bin augur_replay <replay-log.jsonl>");
        eprintln!();
        eprintln!("Example:");
        eprintln!("  cargo run --bin augur_replay traces/session.jsonl");
        std::process::exit(1);
    }

    let path = PathBuf::from(&args[1]);
    let records = match read_records(&path) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Failed to read {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };
    tracing::info!(path = %path.display(), records = records.len(), "Replay log parsed");

    let mut per_call_type: BTreeMap<CallType, (usize, usize, u64, f64)> = BTreeMap::new();
    let mut per_tick: BTreeMap<u64, usize> = BTreeMap::new();
    let mut failures = Vec::new();

    for record in &records {
        let entry = per_call_type.entry(record.call_type).or_default();
        entry.0 += 1;
        if !record.response.success {
            entry.1 += 1;
            failures.push(record);
        }
        entry.2 += record.response.total_tokens();
        entry.3 += record.response.cost_usd;
        *per_tick.entry(record.tick).or_default() += 1;
    }

    println!("REPLAY LOG {}", path.display());
    println!("{} records across {} ticks", records.len(), per_tick.len());
    println!();
    println!("{:<14} {:>8} {:>9} {:>10} {:>12}", "call type", "records", "failures", "tokens", "cost (USD)");
    for call_type in CallType::all() {
        let (count, failed, tokens, cost) = per_call_type.get(&call_type).copied().unwrap_or_default();
        println!("{:<14} {:>8} {:>9} {:>10} {:>12.6}", call_type.as_db_str(), count, failed, tokens, cost);
    }

    if let (Some((first, _)), Some((last, _))) = (per_tick.first_key_value(), per_tick.last_key_value()) {
        let busiest = per_tick.iter().max_by_key(|(_, count)| **count);
        println!();
        println!("ticks {}..={}", first, last);
        if let Some((tick, count)) = busiest {
            println!("busiest tick {} with {} records", tick, count);
        }
    }

    if !failures.is_empty() {
        println!();
        println!("FAILURES");
        for record in failures {
            let reason = record
                .response
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown error".to_string());
            println!("  tick {:>6} {:<12} {}", record.tick, record.call_type.as_db_str(), reason);
        }
    }
}
