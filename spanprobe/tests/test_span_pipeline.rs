//! Ring buffer bytes in, JSON lines out, without a kernel

use chrono::{DateTime, Utc};
use serde_json::Value;
use spanprobe::context::TraceContext;
use spanprobe::domain::Tid;
use spanprobe::export::JsonLinesEmitter;
use spanprobe::runtime::{process_record, ConsumerStats};
use spanprobe::spans::{MemoryDescriptorStore, SpanReconstructor};
use spanprobe::symbolization::{LoadBias, SymbolEntry, SymbolTable};

const BIAS: u64 = 0x5555_0000_0000;
const BOOT: i64 = 1_700_000_000;

type Pipeline = SpanReconstructor<MemoryDescriptorStore, JsonLinesEmitter<Vec<u8>>>;

fn pipeline() -> Pipeline {
    let symbols = SymbolTable::from_entries(
        vec![
            SymbolEntry { start: 0x11_2340, end: 0x11_24e0, name: "main.getUserByID".to_string() },
            SymbolEntry { start: 0x11_2600, end: 0x11_2700, name: "main.getUserHandler".to_string() },
        ],
        0,
    );
    let boot = DateTime::<Utc>::from_timestamp(BOOT, 0).unwrap();
    let context = TraceContext::new(symbols, LoadBias(BIAS), boot);
    SpanReconstructor::new(context, MemoryDescriptorStore::default(), JsonLinesEmitter::new(Vec::new()))
}

fn span_start(tid: u32, ts: u64) -> Vec<u8> {
    [tid.to_le_bytes().as_slice(), &ts.to_le_bytes()].concat()
}

fn func_event(tid: u32, start: u64, end: u64, addr: u64) -> Vec<u8> {
    [tid.to_le_bytes().as_slice(), &start.to_le_bytes(), &end.to_le_bytes(), &addr.to_le_bytes(), &[0; 4]].concat()
}

fn span_end(tid: u32) -> Vec<u8> {
    tid.to_le_bytes().to_vec()
}

fn feed(pipeline: &mut Pipeline, records: &[Vec<u8>]) -> ConsumerStats {
    let mut stats = ConsumerStats::default();
    for record in records {
        process_record(pipeline, record, &mut stats);
    }
    stats
}

fn output(pipeline: Pipeline) -> Vec<Value> {
    let bytes = pipeline.into_sink().into_inner();
    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_one_request_one_line() {
    let mut p = pipeline();
    p.descriptors_mut().insert(Tid(7), "GET /user/1");
    feed(
        &mut p,
        &[span_start(7, 100), func_event(7, 110, 150, BIAS + 0x11_2350), span_end(7)],
    );

    let spans = output(p);
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span["thread_id"], 7);
    assert_eq!(span["request_descriptor"], "GET /user/1");
    assert_eq!(span["span_id"].as_str().unwrap().len(), 32);
    assert_eq!(span["start_time"], "2023-11-14T22:13:20.000000100Z");

    let events = span["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["function_name"], "main.getUserByID");
    assert_eq!(events[0]["duration"], 40);
    assert_eq!(events[0]["thread_id"], 7);
}

#[test]
fn test_unresolved_address_placeholder() {
    let mut p = pipeline();
    feed(&mut p, &[span_start(1, 0), func_event(1, 5, 9, 0xdead_beef), span_end(1)]);
    let spans = output(p);
    assert_eq!(spans[0]["events"][0]["function_name"], "unknown@deadbeef");
}

#[test]
fn test_interleaved_threads() {
    let mut p = pipeline();
    feed(
        &mut p,
        &[
            span_start(1, 10),
            span_start(2, 20),
            func_event(2, 21, 30, BIAS + 0x11_2600),
            func_event(1, 11, 40, BIAS + 0x11_2340),
            span_end(2),
            func_event(1, 41, 45, BIAS + 0x11_2600),
            span_end(1),
        ],
    );

    let spans = output(p);
    assert_eq!(spans.len(), 2);
    assert_eq!(spans[0]["thread_id"], 2);
    assert_eq!(spans[0]["events"].as_array().unwrap().len(), 1);
    assert_eq!(spans[1]["thread_id"], 1);
    let names: Vec<&str> =
        spans[1]["events"].as_array().unwrap().iter().map(|e| e["function_name"].as_str().unwrap()).collect();
    assert_eq!(names, ["main.getUserByID", "main.getUserHandler"]);
}

#[test]
fn test_malformed_and_orphan_records_are_dropped() {
    let mut p = pipeline();
    let stats = feed(
        &mut p,
        &[vec![0u8; 7], func_event(3, 1, 2, BIAS + 0x11_2340), span_end(3), span_start(3, 5), span_end(3)],
    );
    assert_eq!(stats.records, 5);
    assert_eq!(stats.malformed, 1);
    assert_eq!(p.stats.orphan_function_events, 1);
    assert_eq!(p.stats.orphan_ends, 1);

    let spans = output(p);
    assert_eq!(spans.len(), 1);
    assert!(spans[0]["events"].as_array().unwrap().is_empty());
    assert_eq!(spans[0]["request_descriptor"], "");
}

#[test]
fn test_restart_discards_unfinished_span() {
    let mut p = pipeline();
    feed(
        &mut p,
        &[
            span_start(9, 100),
            func_event(9, 101, 102, BIAS + 0x11_2340),
            span_start(9, 200),
            span_end(9),
        ],
    );
    assert_eq!(p.stats.replaced, 1);

    let spans = output(p);
    assert_eq!(spans.len(), 1);
    assert!(spans[0]["events"].as_array().unwrap().is_empty());
    assert_eq!(spans[0]["start_time"], "2023-11-14T22:13:20.000000200Z");
}
