/*
Sample a mongoexport sites dump down to ~100 representative documents
for local testing:

cargo run --release --bin sample_sites -- \
    --input dumps/sites_full.jsonl \
    --output sites.json

The defaults match that layout, so a bare run does the same:

cargo run --release --bin sample_sites
*/

use std::{
    cmp::Reverse,
    collections::HashSet,
    fs::{create_dir_all, File},
    io::{BufRead, BufReader, BufWriter, ErrorKind, Seek, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use log::{debug, info};
use serde_json::Value;
use simplelog::{Config as LogConfig, LevelFilter, WriteLogger};

/// Pick up to QUOTA documents out of a line-delimited JSON dump, preferring
/// documents the heuristics consider interesting and structurally novel.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Full collection dump, one JSON document per line
    #[arg(long, value_name = "PATH", default_value = "dumps/sites_full.jsonl")]
    input: PathBuf,

    /// Sampled records, one JSON document per line
    #[arg(long, value_name = "PATH", default_value = "sites.json")]
    output: PathBuf,

    /// Directory for the run log
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

// Keep at most this many records in the final sample.
const QUOTA: usize = 100;

// Structure signatures stop recursing this many levels below the root and
// never grow past this many characters.
const MAX_SIGNATURE_DEPTH: u32 = 3;
const MAX_SIGNATURE_LEN: usize = 500;

const COLLAPSED: &str = "...";
const ARRAY_SIG: &str = "[]";

// Production site _ids whose documents we always want scored into the
// sample when they show up anywhere in a record.
const PINNED_OBJECT_IDS: [&str; 2] = [
    "64b277f1c9e4d5a0217f3b8e",
    "5fd6f9e83a21c70c4417b2a9",
];

// Line numbers probed when the main scan comes up short of the quota.
const FALLBACK_OFFSETS: [usize; 13] = [
    0, 10, 50, 100, 500, 1000, 5000, 10000, 50000, 100000, 150000, 200000, 250000,
];

#[derive(Debug)]
struct Candidate {
    priority: i64,
    record: Value,
}

// Everything the run reports to the log; skipped lines are counted here
// instead of being surfaced on the console.
#[derive(Debug, Default)]
struct RunStats {
    lines_read: usize,
    malformed: usize,
    unreadable: usize,
    scan_candidates: usize,
    fallback_candidates: usize,
    structures_seen: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // logging setup (stdout stays reserved for the final status line)
    create_dir_all(&cli.log_dir)?;
    let ts = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let log_path = cli.log_dir.join(format!("sample_sites_{ts}.log"));
    WriteLogger::init(
        LevelFilter::Debug,
        LogConfig::default(),
        File::create(&log_path)?,
    )?;
    info!("Started - input: {:?}, output: {:?}", cli.input, cli.output);

    let input = File::open(&cli.input)
        .with_context(|| format!("cannot open {}", cli.input.display()))?;
    let (sample, stats) = collect_sample(BufReader::new(input))?;
    let written = write_sample(&cli.output, &sample)?;

    info!(
        "Scan: {} line(s) read, {} malformed, {} unreadable",
        stats.lines_read, stats.malformed, stats.unreadable
    );
    info!(
        "Candidates: {} from scan ({} distinct structures), {} from fallback offsets",
        stats.scan_candidates, stats.structures_seen, stats.fallback_candidates
    );
    info!("Wrote {} record(s) → {:?}", written, cli.output);
    info!("Finished ✅");

    println!("Wrote {} record(s) to {}", written, cli.output.display());
    Ok(())
}

/// Runs the whole pipeline over one input source: scan for scored and
/// structurally novel candidates, top up from the fixed fallback offsets if
/// the quota is unmet, then sort and cut the final sample.
fn collect_sample<R: BufRead + Seek>(mut reader: R) -> Result<(Vec<Value>, RunStats)> {
    let mut stats = RunStats::default();
    let mut candidates = scan_candidates(&mut reader, &mut stats)?;
    stats.scan_candidates = candidates.len();

    if candidates.len() < QUOTA {
        reader
            .rewind()
            .context("cannot rewind input for fallback sampling")?;
        let mut lines: Vec<String> = Vec::new();
        for (idx, line) in (&mut reader).lines().enumerate() {
            match line {
                Ok(l) => lines.push(l),
                // invalid UTF-8 consumes the line, so skipping makes progress
                Err(err) if err.kind() == ErrorKind::InvalidData => {
                    debug!("fallback re-read line {}: not UTF-8, skipping: {err}", idx + 1);
                    stats.unreadable += 1;
                }
                Err(err) => {
                    return Err(err).context("cannot re-read input for fallback sampling");
                }
            }
        }
        let extra = fallback_candidates(&lines, &mut stats);
        stats.fallback_candidates = extra.len();
        candidates.extend(extra);
    }

    Ok((select_sample(candidates), stats))
}

// Main scan: one pass over the input, stopping once the quota is filled.
// A line that fails to parse or decode is dropped and counted, never fatal -
// one bad record must not kill the run. Read errors other than invalid
// UTF-8 make no progress through the stream and so are fatal instead.
fn scan_candidates<R: BufRead>(reader: R, stats: &mut RunStats) -> Result<Vec<Candidate>> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (idx, line) in reader.lines().enumerate() {
        if candidates.len() >= QUOTA {
            break;
        }
        stats.lines_read += 1;

        let line = match line {
            Ok(l) => l,
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                debug!("line {}: not UTF-8, skipping: {err}", idx + 1);
                stats.unreadable += 1;
                continue;
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("cannot read input at line {}", idx + 1));
            }
        };
        let record: Value = match serde_json::from_str(line.trim()) {
            Ok(v) => v,
            Err(err) => {
                debug!("line {}: bad JSON, skipping: {err}", idx + 1);
                stats.malformed += 1;
                continue;
            }
        };

        let serialized = record.to_string();
        let priority = score_record(&record, &serialized);
        let signature = structure_signature(&record);

        // keep anything scored, plus one specimen of every new shape
        if priority > 0 || !seen.contains(&signature) {
            candidates.push(Candidate { priority, record });
            seen.insert(signature);
        }
    }

    stats.structures_seen = seen.len();
    Ok(candidates)
}

/// Additive interest score for one parsed document. `serialized` is the
/// compact re-serialized form of `record`; the substring checks run on it
/// so they see the whole document, keys and nested values alike.
fn score_record(record: &Value, serialized: &str) -> i64 {
    let mut priority = 0;

    if record.get("glossary").map_or(false, is_truthy) {
        priority += 10;
    }
    if serialized.contains("usage_") {
        priority += 5;
    }
    if serialized.contains("seo_keywords") || serialized.contains("seo-keywords") {
        priority += 5;
    }
    if serialized.to_lowercase().contains("sensitive") {
        priority += 8;
    }
    if serialized.contains('-') {
        priority += 2;
    }
    if serialized.contains('$') {
        priority += 3;
    }
    if PINNED_OBJECT_IDS.iter().any(|id| serialized.contains(id)) {
        priority += 10;
    }
    if serialized.contains("notification_types") {
        priority += 5;
    }
    if record.get("external_tokens").is_some() {
        priority += 3;
    }
    if record.get("channels").is_some() {
        priority += 3;
    }
    if record.get("tags").is_some() {
        priority += 2;
    }
    if record.get("regex_rules").map_or(false, is_truthy) {
        priority += 5;
    }
    if record.get("dynamic_urls").map_or(false, is_truthy) {
        priority += 5;
    }

    priority
}

// Mirrors the truthiness the heuristics were tuned against: null, false,
// zero, and empty containers or strings all count as absent content.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// JSON scalar kinds a signature can name.
#[derive(Debug, Clone, Copy)]
enum ScalarKind {
    String,
    Number,
    Bool,
}

impl ScalarKind {
    fn label(self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Number => "number",
            ScalarKind::Bool => "bool",
        }
    }
}

/// Depth-capped structural fingerprint of a JSON value, used to keep one
/// specimen of each document shape. Object keys are emitted sorted, so two
/// documents with the same shape but different key order collapse to the
/// same signature.
fn structure_signature(record: &Value) -> String {
    let signature = shape_of(record, 0);
    if signature.chars().count() > MAX_SIGNATURE_LEN {
        signature.chars().take(MAX_SIGNATURE_LEN).collect()
    } else {
        signature
    }
}

fn shape_of(value: &Value, depth: u32) -> String {
    if depth > MAX_SIGNATURE_DEPTH {
        return COLLAPSED.to_owned();
    }
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(_) => ScalarKind::Bool.label().to_owned(),
        Value::Number(_) => ScalarKind::Number.label().to_owned(),
        Value::String(_) => ScalarKind::String.label().to_owned(),
        Value::Array(_) => ARRAY_SIG.to_owned(),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|key| format!("{key}:{}", shape_of(&map[key], depth + 1)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

/// Last-resort sampling for dumps too sparse or uniform to fill the quota:
/// probe a fixed set of line offsets and take whatever parses, at priority
/// zero. No deduplication against the scan - a line can land in the sample
/// twice, and that is accepted.
fn fallback_candidates(lines: &[String], stats: &mut RunStats) -> Vec<Candidate> {
    let mut extra = Vec::new();
    for offset in FALLBACK_OFFSETS {
        let Some(line) = lines.get(offset) else {
            continue;
        };
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(record) => extra.push(Candidate {
                priority: 0,
                record,
            }),
            Err(err) => {
                debug!("fallback offset {offset}: bad JSON, skipping: {err}");
                stats.malformed += 1;
            }
        }
    }
    extra
}

// Highest priority first. Equal priorities keep arrival order (the sort
// must stay stable): that is what puts the fallback fills behind everything
// the scan chose when the cut lands among the zeros.
fn select_sample(mut candidates: Vec<Candidate>) -> Vec<Value> {
    candidates.sort_by_key(|c| Reverse(c.priority));
    candidates.truncate(QUOTA);
    candidates.into_iter().map(|c| c.record).collect()
}

fn write_sample(path: &Path, sample: &[Value]) -> Result<usize> {
    let out = File::create(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    let mut writer = BufWriter::new(out);
    for record in sample {
        writeln!(writer, "{record}")?;
    }
    writer.flush()?;
    Ok(sample.len())
}
