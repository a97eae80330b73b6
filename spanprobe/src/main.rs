//! # spanprobe - Main Entry Point
//!
//! Startup runs once on the main task: pre-flight checks, symbol table and
//! bias, eBPF load, probe attachment. A dedicated task then consumes the ring
//! buffer until Ctrl-C, the duration limit, or the exit of the traced process.

#![allow(clippy::too_many_lines)]

use anyhow::{Context, Result};
use clap::Parser;
use regex::Regex;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use spanprobe::cli::{Args, EnumeratorKind};
use spanprobe::context::{boot_time, TraceContext};
use spanprobe::domain::{Pid, TracerError};
use spanprobe::export::JsonLinesEmitter;
use spanprobe::preflight::{check_process_exists, run_preflight_checks};
use spanprobe::probes::{
    discover_targets, EbpfBackend, ElfSymbolEnumerator, NmSymbolEnumerator, ProbeManager, SymbolEnumerator,
};
use spanprobe::runtime::{
    consume_events, init_ebpf_logger, load_ebpf_program, register_source, remove_memlock, take_descriptor_store,
    take_event_stream, write_config,
};
use spanprobe::spans::SpanReconstructor;
use spanprobe::symbolization::{read_bias, SymbolTable};
use spanprobe::target::resolve_target;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

/// How often the liveness of `--pid` is checked
const PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let privilege = err.chain().any(|cause| matches!(cause.downcast_ref::<TracerError>(), Some(TracerError::Privilege(_))));
    let msg = err.to_string().to_lowercase();
    if privilege || msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;
    let pid = args.pid.map(Pid);

    let target = resolve_target(args.target.as_deref(), pid)?;
    let filter = Regex::new(&args.functions).with_context(|| format!("Invalid --functions regex: {}", args.functions))?;

    run_preflight_checks(&target, quiet)?;
    if let Some(pid) = pid {
        check_process_exists(pid)?;
    }

    if !quiet {
        eprintln!("spanprobe v{}", env!("CARGO_PKG_VERSION"));
        eprintln!("target: {}", target.display());
        if let Some(pid) = pid {
            eprintln!("pid: {}", pid.0);
        }
    }

    // ── Phase 1: symbols (nothing in the kernel yet) ────────────────────
    let symbols = SymbolTable::load(&target)?;
    let bias = read_bias(pid, &target, symbols.link_base());
    let context = TraceContext::new(symbols, bias, boot_time());

    let enumerator: Box<dyn SymbolEnumerator> = match args.enumerator {
        EnumeratorKind::Elf => Box::new(ElfSymbolEnumerator),
        EnumeratorKind::Nm => Box::new(NmSymbolEnumerator::new(&args.nm_command)),
    };
    let functions = discover_targets(&*enumerator, &target, &filter)?;

    // ── Phase 2: load eBPF and take the maps user space reads ───────────
    remove_memlock()?;
    let mut bpf = load_ebpf_program()?;
    init_ebpf_logger(&mut bpf);
    write_config(&mut bpf, pid, args.descriptor_arg)?;
    let events = register_source(take_event_stream(&mut bpf)?)?;
    let descriptors = take_descriptor_store(&mut bpf)?;

    // ── Phase 3: attach. Dropping `probes` on any error detaches them ───
    let mut probes = ProbeManager::new(EbpfBackend::new(bpf, &target, pid)?);
    let attached = probes.attach_all(&functions);
    // Exit first so that every span that can start can also end
    probes.attach_dispatch_exit(&args.dispatch)?;
    probes.attach_dispatch_entry(&args.dispatch)?;

    let writer: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout()),
    };
    let reconstructor = SpanReconstructor::new(context, descriptors, JsonLinesEmitter::new(writer));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = tokio::spawn(consume_events(events, reconstructor, shutdown_rx));

    if !quiet {
        eprintln!("functions: {attached}/{}", functions.len());
        eprintln!("dispatch: {}", args.dispatch);
        if let Some(path) = &args.output {
            eprintln!("output: {}", path.display());
        }
        eprintln!("tracing... (Ctrl-C to stop)");
    }

    let started = Instant::now();
    let exit_reason = wait_for_stop(args.duration, pid).await;

    shutdown_tx.send(true).ok();
    let (mut reconstructor, consumer_stats) = consumer.await.context("Consumer task failed")?;
    let discarded = reconstructor.discard_open();
    probes.release_all();

    let stats = reconstructor.stats.clone();
    let emitter = reconstructor.into_sink();

    if !quiet {
        eprintln!(
            "\n{exit_reason}: {:.1}s, {} records ({} malformed, {} read errors), {} spans emitted \
             ({} write failures), {} replaced, {} discarded open, {} function events ({} orphaned)",
            started.elapsed().as_secs_f64(),
            consumer_stats.records,
            consumer_stats.malformed,
            consumer_stats.read_errors,
            emitter.emitted,
            emitter.failed,
            stats.replaced,
            discarded,
            stats.function_events,
            stats.orphan_function_events,
        );
    }

    emitter.into_inner().flush().context("Failed to flush span output")?;
    Ok(())
}

/// Resolve when tracing should stop; returns the reason
async fn wait_for_stop(duration: u64, pid: Option<Pid>) -> &'static str {
    let limit = async {
        if duration > 0 {
            tokio::time::sleep(Duration::from_secs(duration)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    let process_exit = async {
        let Some(pid) = pid else {
            return std::future::pending::<()>().await;
        };
        let proc_path = format!("/proc/{}", pid.0);
        let mut ticker = tokio::time::interval(PROCESS_POLL_INTERVAL);
        loop {
            ticker.tick().await;
            if !Path::new(&proc_path).exists() {
                break;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "interrupted",
        () = limit => "duration limit reached",
        () = process_exit => "process exited",
    }
}
