mod helpers;

use helpers::{prompt, test_engine, train};
use mnemograph::engine::{Engine, EngineOptions};

#[test]
fn hello_world_continues_with_w() {
    let mut engine = test_engine();
    train(&mut engine, "hello world", 1);

    let out = prompt(&mut engine, "hello ");
    assert_eq!(out.first(), Some(&b'w'), "output was {:?}", String::from_utf8_lossy(&out));
}

#[test]
fn unknown_prompt_generates_nothing() {
    let mut engine = test_engine();
    train(&mut engine, "abc", 1);
    // "z" is learned as a fresh node with no successors.
    let out = prompt(&mut engine, "z");
    assert!(out.is_empty());
}

#[test]
fn empty_graph_is_not_an_error() {
    let mut engine = test_engine();
    let out = prompt(&mut engine, "q");
    assert!(out.is_empty());
    assert!(engine.last_path().is_empty());
}

#[test]
fn generation_terminates_on_cyclic_data() {
    let mut engine = test_engine();
    train(&mut engine, "abcabcabcabc", 3);

    engine.write_input(b"abc");
    let result = engine.process_with(true).unwrap();
    let out = engine.take_output();

    assert!(result.stop.is_some());
    let window = engine.graph().stats().cycle_window(engine.options().min_cycle_window);
    assert!(engine.last_path().len() <= window * 4);
    assert_eq!(result.output_len, out.len());
}

#[test]
fn self_loops_do_not_run_forever() {
    let mut engine = test_engine();
    train(&mut engine, "aaaaaaaaaaaaaaaa", 2);
    let out = prompt(&mut engine, "a");
    let window = engine.graph().stats().cycle_window(engine.options().min_cycle_window);
    assert!(out.len() <= window * 4 * 16, "emitted {} bytes", out.len());
}

#[test]
fn process_generates_when_configured() {
    let mut engine = Engine::in_memory(EngineOptions {
        autosave: false,
        generate: true,
        ..EngineOptions::default()
    });
    engine.write_input(b"xyz");
    engine.process().unwrap();
    engine.write_input(b"xy");
    let result = engine.process().unwrap();
    assert!(result.output_len > 0);
    assert!(!engine.output().is_empty());
}

#[test]
fn channel_restricts_generation() {
    let mut engine = test_engine();
    engine.set_channel(1);
    train(&mut engine, "ab", 1);
    engine.set_channel(2);
    train(&mut engine, "ac", 1);

    // From "a", only the successor learned on channel 2 may be emitted.
    let out = prompt(&mut engine, "a");
    assert_eq!(out.first(), Some(&b'c'), "output was {:?}", String::from_utf8_lossy(&out));
}
