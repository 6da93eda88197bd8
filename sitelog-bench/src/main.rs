//! Benchmark CLI for the sitelog runtime
//!
//! Measures the fast-path and delivery costs of the runtime and prints a
//! human-readable summary; optionally writes the structured JSON report.

mod benchmark;
mod report;

use anyhow::{Context, Result};
use benchmark::Benchmark;
use clap::Parser;
use sitelog::dispatcher::{DeferredEmitter, Dispatcher};
use sitelog::emitters::HandleEmitter;
use sitelog::flush::Flush;
use sitelog::test_utils::leak_site;
use sitelog::{Level, LevelSet, Message};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Where to write the JSON report (stdout summary only if omitted)
    json_output: Option<PathBuf>,

    /// Where the sink emitter writes during emission benchmarks
    #[arg(default_value = "/dev/null")]
    emitter_output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let sink: &'static HandleEmitter = Box::leak(Box::new(
        HandleEmitter::for_path(&args.emitter_output)
            .with_context(|| format!("opening {}", args.emitter_output.display()))?,
    ));

    let mut benchmark = Benchmark::new();

    // fast path of a disabled site: one load, one compare
    let disabled = leak_site("bench:disabled", "bench", "bench");
    benchmark.measure("site disabled", move || {
        disabled.log(Level::Info, |message| message.format(("never",)));
    });

    // enabled site, level bit clear: load + bitset test
    let gated = leak_site("bench:gated", "bench", "bench");
    install(gated, sink, LevelSet::only(Level::Critical));
    benchmark.measure("site level-gated", move || {
        gated.log(Level::Verbose, |message| message.format(("never",)));
    });

    // message capture alone, buffer recycled across iterations
    benchmark.measure("message format", {
        let mut message = Message::new();
        let mut sequence = 0_u64;
        move || {
            sequence += 1;
            message.format(("sequence ", sequence, " of many"));
        }
    });

    // full synchronous emission into the sink descriptor
    let sync_site = leak_site("bench:sync", "bench", "bench");
    install(sync_site, sink, LevelSet::all());
    benchmark.measure("emit sync fd", {
        let mut sequence = 0_u64;
        move || {
            sequence += 1;
            sync_site.log(Level::Info, |message| {
                message.format(("sequence ", sequence, " of many"));
            });
        }
    });

    // deferred emission; the per-sample condition drains the queue so
    // producers measure steady-state handoff, not an ever-growing backlog
    let dispatcher = Arc::new(
        Dispatcher::new(Duration::from_millis(1), 4096, 1, 1)
            .with_producer_timeout(Duration::from_secs(1)),
    );
    dispatcher.run();
    let deferred: &'static DeferredEmitter =
        Box::leak(Box::new(DeferredEmitter::new(dispatcher.clone(), sink)));
    let async_site = leak_site("bench:async", "bench", "bench");
    install(async_site, deferred, LevelSet::all());
    benchmark.measure_with(
        "emit async deferred",
        {
            let mut sequence = 0_u64;
            move || {
                sequence += 1;
                async_site.log(Level::Info, |message| {
                    message.format(("sequence ", sequence, " of many"));
                });
            }
        },
        {
            let dispatcher = dispatcher.clone();
            move || {
                let flush = Flush::new();
                dispatcher.enqueue_flush(&flush);
                flush.wait(Duration::from_secs(5));
            }
        },
    );

    print!("{}", benchmark.summary());

    if let Some(path) = args.json_output {
        let report = benchmark.report();
        let encoded = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, encoded).with_context(|| format!("writing {}", path.display()))?;
        println!("report written to {}", path.display());
    }
    Ok(())
}

/// Point a bench site straight at an emitter, bypassing configuration.
fn install(
    site: &'static sitelog::SiteDescriptor,
    emitter: &'static dyn sitelog::emitters::Emitter,
    levels: LevelSet,
) {
    let cell: &'static sitelog::EmitterCell =
        Box::leak(Box::new(sitelog::EmitterCell(emitter)));
    site.set_levels(levels);
    site.set_emitter(cell as *const sitelog::EmitterCell as *mut sitelog::EmitterCell);
}
