//! Whole-node scenarios: tick traces, bootstrap, stdout, lineage recording,
//! black-box lineage, and fixpoint behavior.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use rill::prelude::*;
use rill::Error;
use rill_basics::{crunch_whitespace, FnvRowHash, RowHash, Row};

fn u64_rows(ns: &[u64]) -> BTreeSet<Row> {
    ns.iter().map(|&n| vec![Value::from(n)]).collect()
}

fn int_rows(ns: &[i32]) -> BTreeSet<Row> {
    ns.iter().map(|&n| vec![Value::from(n)]).collect()
}

/// A stdout sink tests can read back.
#[derive(Clone, Default)]
struct CapturedStdout(Arc<Mutex<Vec<u8>>>);

impl CapturedStdout {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for CapturedStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn simple_program() {
    let ctx = BusContext::new();
    let mut b = Builder::new("name", "inproc://yolo", &ctx, NoopClient::new()).unwrap();
    let t = b.table("t", &[("x", Type::UnsignedBigInt)]).unwrap();
    let s = b
        .scratch("s", &[("x", Type::Int), ("y", Type::Int), ("z", Type::Real)])
        .unwrap();
    let c = b
        .channel("c", &[("addr", Type::Text), ("x", Type::Real), ("y", Type::Text)])
        .unwrap();
    b.register_rules(vec![
        Rule::merge(&t, t.scan().count()),
        Rule::merge(&t, s.scan().count()),
        Rule::merge(&t, c.scan().count()),
    ])
    .unwrap();
    let mut f = b.build().unwrap();

    f.tick().unwrap();
    assert_eq!(f.get(&t), &u64_rows(&[0]));
    assert!(f.get(&s).is_empty());
    assert!(f.get(&c).is_empty());

    f.tick().unwrap();
    assert_eq!(f.get(&t), &u64_rows(&[0, 1]));
    assert!(f.get(&s).is_empty());
    assert!(f.get(&c).is_empty());

    f.tick().unwrap();
    assert_eq!(f.get(&t), &u64_rows(&[0, 1, 2]));
    assert!(f.get(&s).is_empty());
    assert!(f.get(&c).is_empty());
}

#[test]
fn simple_bootstrap() {
    let xs: Vec<Row> = (1..=5).map(|n| vec![Value::from(n)]).collect();

    let ctx = BusContext::new();
    let mut b = Builder::new("name", "inproc://yolo", &ctx, NoopClient::new()).unwrap();
    let t = b.table("t", &[("x", Type::Int)]).unwrap();
    let s = b.scratch("s", &[("x", Type::Int)]).unwrap();
    b.register_bootstrap_rules(vec![
        Rule::merge(&t, Expr::iterable("xs", xs.clone(), vec![Type::Int])),
        Rule::merge(&s, Expr::iterable("xs", xs.clone(), vec![Type::Int])),
    ])
    .unwrap();
    b.register_rules(vec![]).unwrap();
    let mut f = b.build().unwrap();

    assert!(f.get(&t).is_empty());
    assert!(f.get(&s).is_empty());
    f.bootstrap_tick().unwrap();
    assert_eq!(f.get(&t), &int_rows(&[1, 2, 3, 4, 5]));
    assert!(f.get(&s).is_empty());
}

#[test]
fn mildly_complex_program_with_stdout() {
    let captured = CapturedStdout::default();

    let ctx = BusContext::new();
    let mut b = Builder::new("name", "inproc://yolo", &ctx, NoopClient::new())
        .unwrap()
        .with_stdout_sink(Box::new(captured.clone()));
    let t = b.table("t", &[("x", Type::UnsignedBigInt)]).unwrap();
    let s = b.scratch("s", &[("x", Type::UnsignedBigInt)]).unwrap();
    let out = b.stdout().unwrap();
    let to_string = |r: &[Value]| vec![Value::Text(r[0].to_string())];
    b.register_rules(vec![
        Rule::merge(&t, t.scan().count()),
        Rule::deferred_merge(&t, t.scan()),
        Rule::deferred_delete(&t, s.scan()),
        Rule::merge(&s, t.scan().count()),
        Rule::merge(&out, s.scan().map(vec![Type::Text], to_string)),
        Rule::deferred_merge(&out, s.scan().map(vec![Type::Text], to_string)),
    ])
    .unwrap();
    let mut f = b.build().unwrap();

    assert!(f.get(&t).is_empty());
    assert!(f.get(&s).is_empty());
    assert_eq!(captured.contents(), "");

    f.tick().unwrap();
    assert_eq!(f.get(&t), &u64_rows(&[0]));
    assert!(f.get(&s).is_empty());
    assert_eq!(captured.contents(), "1\n1\n");

    f.tick().unwrap();
    assert_eq!(f.get(&t), &u64_rows(&[0, 1]));
    assert!(f.get(&s).is_empty());
    assert_eq!(captured.contents(), "1\n1\n2\n2\n");
}

#[test]
fn complex_program_oscillates() {
    let ctx = BusContext::new();
    let mut b = Builder::new("name", "inproc://yolo", &ctx, NoopClient::new()).unwrap();
    let t = b.table("t", &[("x", Type::UnsignedBigInt)]).unwrap();
    let s = b.scratch("s", &[("x", Type::UnsignedBigInt)]).unwrap();
    let plus_one_times_two = |r: &[Value]| {
        let n: i64 = (&r[0]).into();
        vec![Value::from(((1 + n) * 2) as u64)]
    };
    let is_even = |r: &[Value]| {
        let n: i64 = (&r[0]).into();
        n % 2 == 0
    };
    b.register_rules(vec![
        Rule::deferred_merge(&t, s.scan().count()),
        Rule::merge(&t, t.scan().map(vec![Type::UnsignedBigInt], plus_one_times_two)),
        Rule::merge(&s, t.scan()),
        Rule::deferred_delete(&t, s.scan().filter(is_even)),
    ])
    .unwrap();
    let mut f = b.build().unwrap();

    assert!(f.get(&t).is_empty());
    assert!(f.get(&s).is_empty());

    f.tick().unwrap();
    assert_eq!(f.get(&t), &u64_rows(&[0]));
    assert!(f.get(&s).is_empty());

    f.tick().unwrap();
    assert!(f.get(&t).is_empty());
    assert!(f.get(&s).is_empty());

    f.tick().unwrap();
    assert_eq!(f.get(&t), &u64_rows(&[0]));
    assert!(f.get(&s).is_empty());
}

#[test]
fn lineage_of_a_simple_program() {
    let ctx = BusContext::new();
    let mut b = Builder::new("name", "inproc://yolo", &ctx, MockClient::new()).unwrap();
    let t = b.table("t", &[("x", Type::UnsignedBigInt)]).unwrap();
    let s = b.scratch("s", &[("x", Type::UnsignedBigInt)]).unwrap();
    let c = b
        .channel("c", &[("addr", Type::Text), ("x", Type::Real), ("y", Type::Text)])
        .unwrap();
    b.register_rules(vec![
        Rule::merge(&t, t.scan().count()),
        Rule::merge(&t, s.scan().count()),
        Rule::merge(&s, c.scan().count()),
    ])
    .unwrap();
    let mut f = b.build().unwrap();

    let hasher = FnvRowHash::default();
    let h = |n: u64| hasher.hash_row(&[Value::from(n)]);

    {
        let client = f.lineage_client();
        assert!(client.initialized);
        assert_eq!(client.collections.len(), 3);
        assert_eq!(client.collections[0].name, "t");
        assert_eq!(client.collections[0].column_names, vec!["x".to_owned()]);
        assert_eq!(client.collections[0].column_types, vec!["bigint".to_owned()]);
        assert_eq!(client.collections[1].name, "s");
        assert_eq!(client.collections[2].name, "c");
        assert_eq!(
            client.collections[2].column_types,
            vec![
                "text".to_owned(),
                "double precision".to_owned(),
                "text".to_owned()
            ]
        );

        assert_eq!(client.rules.len(), 3);
        assert_eq!(client.rules[0].text, "t <= Count(t)");
        assert_eq!(client.rules[1].text, "t <= Count(s)");
        assert_eq!(client.rules[2].text, "s <= Count(c)");
        assert!(client.rules.iter().all(|r| !r.bootstrap));
    }

    // Tick 1: every count is over an empty input.
    f.tick().unwrap();
    assert_eq!(f.get(&t), &u64_rows(&[0]));
    {
        let client = f.lineage_client();
        assert_eq!(client.inserts.len(), 3);
        let summary: Vec<(&str, u64, u64, &[String])> = client
            .inserts
            .iter()
            .map(|r| (r.collection.as_str(), r.row_id, r.time, &r.values[..]))
            .collect();
        assert_eq!(summary[0].0, "t");
        assert_eq!(summary[0].1, 1);
        assert_eq!(summary[0].2, 1);
        assert_eq!(summary[0].3, &["0".to_owned()][..]);
        assert_eq!(summary[1].0, "t");
        assert_eq!(summary[1].1, 2);
        assert_eq!(summary[2].0, "s");
        assert_eq!(summary[2].1, 3);

        // Clearing the scratch at tick end deletes its tuple.
        assert_eq!(client.deletes.len(), 1);
        assert_eq!(client.deletes[0].collection, "s");
        assert_eq!(client.deletes[0].row_id, 4);
        assert_eq!(client.deletes[0].values, vec!["0".to_owned()]);

        assert!(client.networked.is_empty());
        assert!(client.derived.is_empty());
    }

    // Tick 2: rule 0 now counts one tuple, which is its dependency.
    f.tick().unwrap();
    assert_eq!(f.get(&t), &u64_rows(&[0, 1]));
    {
        let client = f.lineage_client();
        assert_eq!(client.inserts.len(), 6);
        assert_eq!(client.inserts[3].collection, "t");
        assert_eq!(client.inserts[3].row_id, 5);
        assert_eq!(client.inserts[3].time, 2);
        assert_eq!(client.inserts[3].values, vec!["1".to_owned()]);
        assert_eq!(client.inserts[4].collection, "t");
        assert_eq!(client.inserts[4].row_id, 6);
        assert_eq!(client.inserts[4].values, vec!["0".to_owned()]);
        assert_eq!(client.inserts[5].collection, "s");
        assert_eq!(client.inserts[5].row_id, 7);
        assert_eq!(client.deletes.len(), 2);
        assert_eq!(client.deletes[1].row_id, 8);

        assert_eq!(client.derived.len(), 1);
        let d = &client.derived[0];
        assert_eq!(
            (
                d.dep_collection.as_str(),
                d.dep_hash,
                d.rule,
                d.inserted,
                d.time,
                d.collection.as_str(),
                d.hash,
                d.row_id
            ),
            ("t", h(0), 0, true, 2, "t", h(1), 5)
        );
    }

    // Tick 3: both tuples of t feed the new count.
    f.tick().unwrap();
    assert_eq!(f.get(&t), &u64_rows(&[0, 1, 2]));
    {
        let client = f.lineage_client();
        assert_eq!(client.inserts.len(), 9);
        assert_eq!(client.inserts[6].row_id, 9);
        assert_eq!(client.inserts[6].values, vec!["2".to_owned()]);
        assert_eq!(client.deletes.len(), 3);

        assert_eq!(client.derived.len(), 3);
        let mut tick3: Vec<(u64, u64)> = client.derived[1..]
            .iter()
            .map(|d| {
                assert_eq!(d.dep_collection, "t");
                assert_eq!(d.rule, 0);
                assert!(d.inserted);
                assert_eq!(d.time, 3);
                assert_eq!(d.collection, "t");
                assert_eq!(d.row_id, 9);
                (d.dep_hash, d.hash)
            })
            .collect();
        tick3.sort();
        let mut expected = vec![(h(0), h(2)), (h(1), h(2))];
        expected.sort();
        assert_eq!(tick3, expected);
    }
}

#[test]
fn bootstrap_rules_are_recorded_as_such() {
    let ctx = BusContext::new();
    let mut b = Builder::new("name", "inproc://yolo", &ctx, MockClient::new()).unwrap();
    let t = b.table("t", &[("x", Type::Int)]).unwrap();
    b.register_bootstrap_rules(vec![Rule::merge(
        &t,
        Expr::iterable("xs", vec![vec![1.into()]], vec![Type::Int]),
    )])
    .unwrap();
    b.register_rules(vec![Rule::deferred_merge(&t, t.scan())])
        .unwrap();
    let f = b.build().unwrap();

    let client = f.lineage_client();
    assert_eq!(client.rules.len(), 2);
    assert_eq!(client.rules[0].id, 0);
    assert!(client.rules[0].bootstrap);
    assert_eq!(client.rules[0].text, "t <= xs");
    assert_eq!(client.rules[1].id, 1);
    assert!(!client.rules[1].bootstrap);
    assert_eq!(client.rules[1].text, "t += t");
}

#[test]
fn black_box_lineage_emits_two_functions() {
    let ctx = BusContext::new();
    let mut b = Builder::new("name", "inproc://yolo", &ctx, MockClient::new()).unwrap();
    let req = b
        .channel(
            "f_request",
            &[
                ("dst_addr", Type::Text),
                ("src_addr", Type::Text),
                ("id", Type::BigInt),
                ("x", Type::Int),
            ],
        )
        .unwrap();
    let resp = b
        .channel(
            "f_response",
            &[("addr", Type::Text), ("id", Type::BigInt), ("y", Type::Int)],
        )
        .unwrap();
    b.register_rules(vec![]).unwrap();
    let mut f = b.build().unwrap();

    f.register_black_box_lineage(&req, &resp, |time_inserted, xs, ys| {
        assert_eq!(time_inserted, "$1");
        assert_eq!(xs, &["$2".to_owned()][..]);
        assert_eq!(ys, &["$3".to_owned()][..]);
        "hello world".to_owned()
    })
    .unwrap();

    let client = f.lineage_client();
    assert_eq!(client.execs.len(), 2);
    assert_eq!(
        crunch_whitespace(&client.execs[0].1),
        crunch_whitespace(
            r"CREATE FUNCTION name_f_response_lineage_impl(integer, integer, integer)
              RETURNS TABLE(collection_name text, hash bigint, time_inserted integer)
              AS $$hello world$$ LANGUAGE SQL;"
        )
    );
    assert_eq!(
        crunch_whitespace(&client.execs[1].1),
        crunch_whitespace(
            r"CREATE FUNCTION name_f_response_lineage(bigint)
              RETURNS TABLE(collection_name text, hash bigint, time_inserted integer)
              AS $$
                SELECT name_f_response_lineage_impl(Req.time_inserted, Req.x, Resp.y)
                FROM name_f_request Req, name_f_response Resp
                WHERE Req.id = $1 AND Resp.id = $1
              $$ LANGUAGE SQL;"
        )
    );
}

#[test]
fn recursive_rules_converge_under_extra_passes() {
    let ctx = BusContext::new();
    let mut b = Builder::new("name", "inproc://yolo", &ctx, NoopClient::new())
        .unwrap()
        .with_max_passes(10);
    let edge = b.table("edge", &[("x", Type::Int), ("y", Type::Int)]).unwrap();
    let path = b.table("path", &[("x", Type::Int), ("y", Type::Int)]).unwrap();
    b.register_rules(vec![
        Rule::merge(&path, edge.scan()),
        Rule::merge(
            &path,
            path.scan()
                .hash_join(edge.scan(), vec![1], vec![0])
                .project(vec![0, 3]),
        ),
    ])
    .unwrap();
    let mut f = b.build().unwrap();

    f.inject(
        &edge,
        vec![
            vec![1.into(), 2.into()],
            vec![2.into(), 3.into()],
            vec![3.into(), 4.into()],
        ],
    )
    .unwrap();
    f.tick().unwrap();

    let expected: BTreeSet<Row> = vec![
        vec![1.into(), 2.into()],
        vec![2.into(), 3.into()],
        vec![3.into(), 4.into()],
        vec![1.into(), 3.into()],
        vec![2.into(), 4.into()],
        vec![1.into(), 4.into()],
    ]
    .into_iter()
    .collect();
    assert_eq!(f.get(&path), &expected);
}

#[test]
fn divergent_rules_hit_the_pass_bound_and_roll_back() {
    let ctx = BusContext::new();
    let mut b = Builder::new("name", "inproc://yolo", &ctx, NoopClient::new())
        .unwrap()
        .with_max_passes(3);
    let t = b.table("t", &[("x", Type::UnsignedBigInt)]).unwrap();
    b.register_rules(vec![Rule::merge(&t, t.scan().count())])
        .unwrap();
    let mut f = b.build().unwrap();

    match f.tick() {
        Err(Error::Fixpoint(passes)) => assert_eq!(passes, 3),
        other => panic!("expected a fixpoint error, got {:?}", other),
    }
    assert!(f.get(&t).is_empty());
    assert_eq!(f.logical_time(), 0);
}

#[test]
fn group_by_rule_end_to_end() {
    let ctx = BusContext::new();
    let mut b = Builder::new("name", "inproc://yolo", &ctx, NoopClient::new()).unwrap();
    let sales = b
        .table("sales", &[("item", Type::Text), ("n", Type::Int)])
        .unwrap();
    let totals = b
        .table(
            "totals",
            &[("item", Type::Text), ("total", Type::Int), ("entries", Type::UnsignedBigInt)],
        )
        .unwrap();
    b.register_rules(vec![Rule::merge(
        &totals,
        sales
            .scan()
            .group_by(vec![0], vec![(Aggregate::Sum, 1), (Aggregate::Count, 1)]),
    )])
    .unwrap();
    let mut f = b.build().unwrap();

    f.inject(
        &sales,
        vec![
            vec!["apple".into(), 3.into()],
            vec!["apple".into(), 4.into()],
            vec!["pear".into(), 1.into()],
        ],
    )
    .unwrap();
    f.tick().unwrap();

    let expected: BTreeSet<Row> = vec![
        vec!["apple".into(), 7.into(), Value::from(2u64)],
        vec!["pear".into(), 1.into(), Value::from(1u64)],
    ]
    .into_iter()
    .collect();
    assert_eq!(f.get(&totals), &expected);
}
