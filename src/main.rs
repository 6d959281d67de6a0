use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use std::{cmp, fs, io};

use anyhow::Context;
use chrono::offset::TimeZone;
use clap::{Parser, Subcommand};
use itertools::Itertools;
use log::debug;
use strum::IntoEnumIterator;

use hprof_graph::heap_dump::RootKind;
use hprof_graph::{parse_hprof, Hprof, RecordTag, Snapshot};

/// Inspect hprof heap dumps: records, heaps, classes, and retained sizes.
#[derive(Parser)]
#[command(name = "hprof-graph", version)]
struct Args {
    /// Heap dump file to read
    #[arg(short, long)]
    file: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Display metadata from the hprof header
    Header,
    /// Count each top level record type
    RecordCounts,
    /// Summarize each heap in the dump
    Heaps,
    /// Write per-class instance counts and sizes as CSV
    Classes {
        /// Skip the dominator pass and leave the retained column empty
        #[arg(long)]
        no_retained: bool,
    },
    /// List the largest objects by retained size
    Retained {
        /// Number of objects to list
        #[arg(long, default_value_t = 25)]
        top: usize,
    },
    /// Summarize gc roots and recorded threads
    Roots,
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let args = Args::parse();

    let file = fs::File::open(&args.file)
        .with_context(|| format!("could not open {}", args.file.display()))?;
    let mapped = unsafe { memmap2::MmapOptions::new().map(&file) }
        .with_context(|| format!("could not map {}", args.file.display()))?;
    let hprof = parse_hprof(&mapped[..])?;

    match args.command {
        Command::Header => header(&hprof),
        Command::RecordCounts => record_counts(&hprof)?,
        Command::Heaps => heaps(&hprof)?,
        Command::Classes { no_retained } => classes(&hprof, no_retained)?,
        Command::Retained { top } => retained(&hprof, top)?,
        Command::Roots => roots(&hprof)?,
    }

    Ok(())
}

fn header(hprof: &Hprof) {
    let h = hprof.header();
    match h.label() {
        Ok(label) => println!("Label: {}", label),
        Err(_) => println!("Label: (invalid utf8)"),
    }
    println!("Id size: {:?}", h.id_size());
    match chrono::Utc.timestamp_millis_opt(h.timestamp_millis() as i64) {
        chrono::LocalResult::Single(ts) => println!("Timestamp: {}", ts),
        _ => println!("Timestamp: {} ms since epoch", h.timestamp_millis()),
    }
}

fn record_counts(hprof: &Hprof) -> Result<(), anyhow::Error> {
    // zero counts for every known tag so quiet dumps still list them all
    let mut counts = RecordTag::iter()
        .map(|t| (t, 0_u64))
        .collect::<HashMap<_, _>>();
    let mut unrecognized = 0_u64;

    for result in hprof.records_iter() {
        let record = result?;
        match record.tag() {
            Some(tag) => *counts.entry(tag).or_insert(0) += 1,
            None => unrecognized += 1,
        }
    }

    // highest count on top
    for (tag, count) in counts
        .into_iter()
        .sorted_by_key(|&(tag, count)| (cmp::Reverse(count), tag))
    {
        println!("{:?}: {}", tag, count);
    }
    if unrecognized > 0 {
        println!("(unrecognized tags): {}", unrecognized);
    }

    Ok(())
}

fn heaps(hprof: &Hprof) -> Result<(), anyhow::Error> {
    let mut snapshot = build_snapshot(hprof)?;
    snapshot.compute_dominators();
    let dom = snapshot.dominators().expect("dominators were just computed");

    for (index, heap) in snapshot.heaps().iter().enumerate() {
        println!("{} (id {})", heap.name(), heap.id());
        println!("  classes: {}", heap.classes().count());
        println!("  instances and arrays: {}", heap.instances().len());
        println!("  reachable bytes: {}", dom.heap_total(index));
    }
    println!(
        "{} gc roots, {} threads",
        snapshot.gc_roots().len(),
        snapshot.threads().count()
    );

    Ok(())
}

fn classes(hprof: &Hprof, no_retained: bool) -> Result<(), anyhow::Error> {
    let mut snapshot = build_snapshot(hprof)?;
    if !no_retained {
        let start = Instant::now();
        snapshot.compute_dominators();
        debug!("dominator pass took {:?}", start.elapsed());
    }

    let mut wtr = csv::Writer::from_writer(io::stdout());
    wtr.write_record(&[
        "Instance count",
        "Total shallow size (bytes)",
        "Total retained size (bytes)",
        "Class name",
        "Class obj id",
    ])?;

    for stats in snapshot
        .class_stats()
        .into_iter()
        .sorted_by_key(|s| cmp::Reverse(s.retained_total.unwrap_or(s.shallow_total)))
    {
        wtr.write_record(&[
            format!("{}", stats.instance_count),
            format!("{}", stats.shallow_total),
            stats
                .retained_total
                .map(|b| b.to_string())
                .unwrap_or_default(),
            stats.name.to_owned(),
            format!("{}", snapshot.obj(stats.class).id()),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

fn retained(hprof: &Hprof, top: usize) -> Result<(), anyhow::Error> {
    let mut snapshot = build_snapshot(hprof)?;
    let start = Instant::now();
    snapshot.compute_dominators();
    debug!("dominator pass took {:?}", start.elapsed());
    let dom = snapshot.dominators().expect("dominators were just computed");

    println!(
        "{} objects, {} bytes reachable",
        snapshot.object_count(),
        dom.heap_totals().iter().sum::<u64>()
    );

    let heap_names: Vec<&str> = snapshot.heaps().iter().map(|h| h.name()).collect();
    for (obj_ref, _) in snapshot
        .objects()
        .filter(|&(r, _)| dom.is_reachable(r))
        .sorted_by_key(|&(r, _)| cmp::Reverse(dom.retained_size(r)))
        .take(top)
    {
        let per_heap = heap_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name, dom.retained_in_heap(obj_ref, i)))
            .filter(|&(_, bytes)| bytes > 0)
            .map(|(name, bytes)| format!("{}: {}", name, bytes))
            .join(", ");
        println!(
            "{:>12}  {}  [{}]",
            dom.retained_size(obj_ref),
            snapshot.obj_label(obj_ref),
            per_heap
        );
    }

    Ok(())
}

fn roots(hprof: &Hprof) -> Result<(), anyhow::Error> {
    let snapshot = build_snapshot(hprof)?;

    let mut by_kind: HashMap<RootKind, u64> = HashMap::new();
    for root in snapshot.gc_roots() {
        *by_kind.entry(root.kind()).or_insert(0) += 1;
    }
    for (kind, count) in by_kind
        .into_iter()
        .sorted_by_key(|&(kind, count)| (cmp::Reverse(count), kind.name()))
    {
        println!("{}: {}", kind.name(), count);
    }

    for thread in snapshot.threads().sorted_by_key(|t| t.thread_serial()) {
        match thread.obj_id() {
            Some(id) => println!("thread serial {}: object {:#X}", thread.thread_serial(), id),
            None => println!("thread serial {}: no thread object", thread.thread_serial()),
        }
    }

    Ok(())
}

fn build_snapshot<'a>(hprof: &Hprof<'a>) -> Result<Snapshot<'a>, anyhow::Error> {
    let start = Instant::now();
    let snapshot = Snapshot::parse(hprof)?;
    debug!(
        "resolved {} objects across {} heaps in {:?}",
        snapshot.object_count(),
        snapshot.heaps().len(),
        start.elapsed()
    );
    Ok(snapshot)
}
