//! The high-level run loop: periodic timers and stdin draining.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use rill::prelude::*;

#[test]
fn periodics_fire_while_running() {
    let ctx = BusContext::new();
    let mut b = Builder::new("beatnik", "inproc://beatnik", &ctx, NoopClient::new()).unwrap();
    let beat = b.periodic("beat", Duration::from_millis(10)).unwrap();
    let log = b
        .table("log", &[("id", Type::UnsignedBigInt), ("when", Type::Timestamp)])
        .unwrap();
    b.register_rules(vec![Rule::merge(&log, beat.scan())]).unwrap();
    let mut f = b.build().unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let handle = thread::spawn(move || {
        f.run(&stop_flag).unwrap();
        f
    });

    thread::sleep(Duration::from_millis(250));
    stop.store(true, Ordering::SeqCst);
    let f = handle.join().unwrap();

    let rows = f.get(&log);
    assert!(!rows.is_empty(), "no periodic tuples were recorded");
    // Sequence numbers are distinct per firing.
    let ids: std::collections::BTreeSet<Value> =
        rows.iter().map(|r| r[0].clone()).collect();
    assert_eq!(ids.len(), rows.len());
    assert!(ids.contains(&Value::from(0u64)));

    // Periodic collections themselves end every tick empty.
    assert!(f.get(&beat).is_empty());
}

#[test]
fn stdin_lines_become_tuples() {
    let (tx, rx) = mpsc::channel();

    let ctx = BusContext::new();
    let mut b = Builder::new("reader", "inproc://reader", &ctx, NoopClient::new())
        .unwrap()
        .with_stdin_feed(rx);
    let stdin = b.stdin().unwrap();
    let lines = b.table("lines", &[("line", Type::Text)]).unwrap();
    b.register_rules(vec![Rule::merge(&lines, stdin.scan())]).unwrap();
    let mut f = b.build().unwrap();

    tx.send("hello".to_owned()).unwrap();
    tx.send("world".to_owned()).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let handle = thread::spawn(move || {
        f.run(&stop_flag).unwrap();
        f
    });

    thread::sleep(Duration::from_millis(300));
    stop.store(true, Ordering::SeqCst);
    let f = handle.join().unwrap();

    let rows = f.get(&lines);
    assert!(rows.contains(&vec![Value::from("hello")]));
    assert!(rows.contains(&vec![Value::from("world")]));
    assert!(f.get(&stdin).is_empty());
}
