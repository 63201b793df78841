//! The per-node executor: owns the collections, drives rules to quiescence
//! once per tick, ships channel tuples over the bus, and emits lineage.

use std::collections::BTreeSet;
use std::io::Write;
use std::iter;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use rill_basics::{
    Clock, CollectionKind, Error, LogicalTime, Result, Row, RowHash, RuleId, SharedClock,
    SharedRowHash, Value,
};
use rill_channel::{Bus, Envelope};
use rill_lineage::{LineageClient, SqlMapping};

use crate::builder::CollectionHandle;
use crate::collection::{render_line, Collection, CollectionId};
use crate::pickle::Pickler;
use crate::ra::{EvalContext, Expr, LineagedRow};
use crate::rule::{Rule, RuleKind};

/// How long `run` waits in one `receive` before re-checking the stop flag
/// and the periodic deadlines.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a bare `receive()` waits for a message.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Executor<L> {
    pub(crate) name: String,
    pub(crate) id: u64,
    pub(crate) collections: Vec<Collection>,
    pub(crate) bootstrap_rules: Vec<Rule>,
    pub(crate) rules: Vec<Rule>,
    pub(crate) bus: Bus,
    pub(crate) pickler: Box<dyn Pickler + Send>,
    pub(crate) sql_mapping: Box<dyn SqlMapping + Send>,
    pub(crate) lineage: L,
    pub(crate) clock: SharedClock,
    pub(crate) hasher: SharedRowHash,
    pub(crate) stdout_sink: Box<dyn Write + Send>,
    pub(crate) stdin_feed: Option<Receiver<String>>,
    pub(crate) time: LogicalTime,
    pub(crate) bootstrapped: bool,
    pub(crate) ticked: bool,
    pub(crate) max_passes: usize,
    pub(crate) log: slog::Logger,
}

impl<L: LineageClient> Executor<L> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This node's 64-bit identity, as recorded in networked lineage.
    pub fn node_id(&self) -> u64 {
        self.id
    }

    /// The endpoint the node is actually bound to (wildcard ports resolved).
    pub fn endpoint(&self) -> &str {
        self.bus.endpoint()
    }

    pub fn logical_time(&self) -> LogicalTime {
        self.time
    }

    /// The lineage client, for tests and tooling that inspect it.
    pub fn lineage_client(&self) -> &L {
        &self.lineage
    }

    /// The current tuples of a collection, read-only.
    pub fn get(&self, c: &CollectionHandle) -> &BTreeSet<Row> {
        self.collections[c.id].tuples()
    }

    /// Merges `rows` out-of-band, as if by an anonymous instantaneous rule.
    /// Used to seed state (e.g. a channel) from outside the rule system.
    pub fn inject(&mut self, c: &CollectionHandle, rows: Vec<Row>) -> Result<()> {
        let rows = rows.into_iter().map(LineagedRow::bare).collect();
        self.apply_merge(None, c.id, rows).map(|_| ())
    }

    /// Runs the bootstrap rules. Must be called at most once, before any
    /// `tick`.
    pub fn bootstrap_tick(&mut self) -> Result<()> {
        if self.bootstrapped || self.ticked {
            return Err(Error::config(
                "bootstrap_tick may only be called once, before any tick",
            ));
        }
        self.bootstrapped = true;
        debug!(self.log, "bootstrap tick");
        self.run_tick(true)
    }

    /// Runs one tick: advances logical time, evaluates the rules, commits
    /// deferred effects, ships and clears channels, clears transients, and
    /// emits lineage. On failure the tick's effects are rolled back.
    pub fn tick(&mut self) -> Result<()> {
        self.ticked = true;
        self.time += 1;
        trace!(self.log, "tick"; "time" => self.time);
        match self.run_tick(false) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.time -= 1;
                Err(e)
            }
        }
    }

    fn run_tick(&mut self, bootstrap: bool) -> Result<()> {
        let snapshot: Vec<BTreeSet<Row>> =
            self.collections.iter().map(|c| c.tuples().clone()).collect();

        let result = self
            .evaluate_rules(bootstrap)
            .and_then(|()| self.clear_transients());

        if let Err(ref e) = result {
            warn!(self.log, "tick failed, rolling back"; "error" => %e);
            for (c, saved) in self.collections.iter_mut().zip(snapshot) {
                c.restore(saved);
            }
            // Transients are left empty even by a failed tick.
            for c in &mut self.collections {
                if c.is_transient() {
                    c.clear();
                }
            }
        }
        result
    }

    fn evaluate_rules(&mut self, bootstrap: bool) -> Result<()> {
        // The rules are moved aside so rule evaluation can borrow the
        // collections while the executor mutates them.
        let rules = if bootstrap {
            mem::replace(&mut self.bootstrap_rules, Vec::new())
        } else {
            mem::replace(&mut self.rules, Vec::new())
        };
        let result = self.evaluate(&rules);
        if bootstrap {
            self.bootstrap_rules = rules;
        } else {
            self.rules = rules;
        }
        result
    }

    fn evaluate(&mut self, rules: &[Rule]) -> Result<()> {
        let mut deferred: Vec<Vec<LineagedRow>> = rules.iter().map(|_| Vec::new()).collect();

        for pass in 1..=self.max_passes {
            let mut changed = false;
            for (i, rule) in rules.iter().enumerate() {
                let rows = self.materialize(&rule.expr)?;
                match rule.kind {
                    RuleKind::Merge => {
                        changed |= self.apply_merge(Some(rule.id), rule.target, rows)?;
                    }
                    RuleKind::DeferredMerge | RuleKind::DeferredDelete => {
                        stage(&mut deferred[i], rows);
                    }
                }
            }
            if !changed {
                break;
            }
            if pass == self.max_passes && self.max_passes > 1 {
                return Err(Error::Fixpoint(self.max_passes));
            }
        }

        // Deferred merges commit before deferred deletes, each in rule
        // declaration order.
        for (i, rule) in rules.iter().enumerate() {
            if rule.kind == RuleKind::DeferredMerge {
                let rows = mem::replace(&mut deferred[i], Vec::new());
                self.apply_merge(Some(rule.id), rule.target, rows)?;
            }
        }
        for (i, rule) in rules.iter().enumerate() {
            if rule.kind == RuleKind::DeferredDelete {
                let rows = mem::replace(&mut deferred[i], Vec::new());
                self.apply_delete(rule.id, rule.target, rows)?;
            }
        }
        Ok(())
    }

    fn materialize(&self, expr: &Expr) -> Result<Vec<LineagedRow>> {
        let ctx = EvalContext {
            collections: &self.collections,
            hasher: &*self.hasher,
        };
        let phys = expr.to_physical(ctx)?;
        let mut out: Vec<LineagedRow> = Vec::new();
        for lr in phys.to_range() {
            stage(&mut out, iter::once(lr));
        }
        Ok(out)
    }

    /// Applies a merge of `rows` into the target collection, emitting
    /// lineage and, for channels, handing every tuple to the send path.
    /// Returns whether the node's observable state changed.
    fn apply_merge(
        &mut self,
        rule: Option<RuleId>,
        target: CollectionId,
        rows: Vec<LineagedRow>,
    ) -> Result<bool> {
        if rows.is_empty() {
            return Ok(false);
        }
        let name = self.collections[target].name().to_owned();
        let kind = self.collections[target].kind();

        let changed = match kind {
            CollectionKind::Channel => {
                // A channel is transport, not storage: every merged tuple is
                // shipped to the endpoint in its column 0. Local contents
                // come only from receive().
                for lr in &rows {
                    let dest = match lr.row.first().and_then(Value::as_text) {
                        Some(d) => d.to_owned(),
                        None => {
                            return Err(Error::schema(format!(
                                "channel {:?} tuple has a non-text address",
                                name
                            )));
                        }
                    };
                    let payload = self.pickler.pickle(&lr.row)?;
                    let envelope = Envelope {
                        channel: name.clone(),
                        from_node: self.id,
                        from_time: self.time,
                        payload,
                    };
                    self.bus.send(&dest, &envelope.encode()?)?;
                    trace!(self.log, "sent tuple"; "channel" => %name, "dest" => %dest);
                }
                false
            }
            CollectionKind::Stdout => {
                // A failed sink write is a rendering failure, not a bus one.
                for lr in &rows {
                    writeln!(self.stdout_sink, "{}", render_line(&lr.row))
                        .map_err(|e| Error::serialization(format!("stdout write failed: {}", e)))?;
                }
                self.stdout_sink
                    .flush()
                    .map_err(|e| Error::serialization(format!("stdout write failed: {}", e)))?;
                !self.collections[target]
                    .merge(rows.iter().map(|lr| lr.row.clone()))
                    .is_empty()
            }
            _ => !self.collections[target]
                .merge(rows.iter().map(|lr| lr.row.clone()))
                .is_empty(),
        };

        self.emit_insert_lineage(rule, &name, &rows)?;
        Ok(changed)
    }

    fn emit_insert_lineage(
        &mut self,
        rule: Option<RuleId>,
        collection: &str,
        rows: &[LineagedRow],
    ) -> Result<()> {
        let time = self.time;
        for lr in rows {
            let row_id = self.lineage.insert_tuple(collection, time, &lr.row)?;
            if let Some(rule) = rule {
                let hash = self.hasher.hash_row(&lr.row);
                for &(ref dep_collection, dep_hash) in &lr.lineage {
                    self.lineage.add_derived_lineage(
                        dep_collection,
                        dep_hash,
                        rule,
                        true,
                        time,
                        collection,
                        hash,
                        row_id,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn apply_delete(
        &mut self,
        rule: RuleId,
        target: CollectionId,
        rows: Vec<LineagedRow>,
    ) -> Result<()> {
        let name = self.collections[target].name().to_owned();
        let time = self.time;
        for lr in rows {
            let removed = self.collections[target].delete(iter::once(lr.row.clone()));
            if removed.is_empty() {
                continue;
            }
            let row_id = self.lineage.delete_tuple(&name, time, &lr.row)?;
            let hash = self.hasher.hash_row(&lr.row);
            for (dep_collection, dep_hash) in lr.lineage {
                self.lineage.add_derived_lineage(
                    &dep_collection,
                    dep_hash,
                    rule,
                    false,
                    time,
                    &name,
                    hash,
                    row_id,
                )?;
            }
        }
        Ok(())
    }

    fn clear_transients(&mut self) -> Result<()> {
        for i in 0..self.collections.len() {
            if !self.collections[i].is_transient() {
                continue;
            }
            let removed = self.collections[i].clear();
            if removed.is_empty() {
                continue;
            }
            let name = self.collections[i].name().to_owned();
            for row in removed {
                self.lineage.delete_tuple(&name, self.time, &row)?;
            }
        }
        Ok(())
    }

    /// Waits up to one second for an inbound message; see `receive_timeout`.
    pub fn receive(&mut self) -> Result<bool> {
        self.receive_timeout(RECEIVE_TIMEOUT)
    }

    /// Drains one inbound message into its channel, waiting at most
    /// `timeout`. Returns whether a message was processed. A message naming
    /// no channel at this node, or one that fails to decode, is dropped and
    /// reported as a non-fatal error; the executor remains usable.
    pub fn receive_timeout(&mut self, timeout: Duration) -> Result<bool> {
        let frame = match self.bus.recv_timeout(timeout)? {
            Some(frame) => frame,
            None => return Ok(false),
        };
        let envelope = Envelope::decode(&frame)?;

        let idx = self.collections.iter().position(|c| {
            c.kind() == CollectionKind::Channel && c.name() == envelope.channel
        });
        let idx = match idx {
            Some(idx) => idx,
            None => {
                warn!(self.log, "dropping message for unknown channel";
                      "channel" => %envelope.channel);
                return Err(Error::network(format!(
                    "no channel named {:?} at this node",
                    envelope.channel
                )));
            }
        };

        let row = self
            .pickler
            .unpickle(&envelope.payload, self.collections[idx].schema())?;
        self.collections[idx].merge(iter::once(row.clone()));

        let name = self.collections[idx].name().to_owned();
        let hash = self.hasher.hash_row(&row);
        self.lineage.insert_tuple(&name, self.time, &row)?;
        self.lineage.add_networked_lineage(
            envelope.from_node,
            envelope.from_time,
            &name,
            hash,
            self.time,
        )?;
        trace!(self.log, "received tuple"; "channel" => %name, "from" => envelope.from_node);
        Ok(true)
    }

    fn nearest_periodic_deadline(&self) -> Option<Instant> {
        self.collections.iter().filter_map(|c| c.next_deadline()).min()
    }

    /// Synthesizes one `(seq, now)` tuple per elapsed period into each
    /// periodic collection.
    fn fire_periodics(&mut self) -> Result<()> {
        let now = Instant::now();
        for i in 0..self.collections.len() {
            let fired = self.collections[i].take_elapsed(now);
            if fired.is_empty() {
                continue;
            }
            let when = self.clock.now();
            let rows: Vec<LineagedRow> = fired
                .into_iter()
                .map(|seq| LineagedRow::bare(vec![Value::from(seq), Value::from(when)]))
                .collect();
            self.apply_merge(None, i, rows)?;
        }
        Ok(())
    }

    fn drain_stdin(&mut self) -> Result<()> {
        let lines: Vec<String> = match self.stdin_feed {
            Some(ref feed) => feed.try_iter().collect(),
            None => return Ok(()),
        };
        if lines.is_empty() {
            return Ok(());
        }
        let idx = self
            .collections
            .iter()
            .position(|c| c.kind() == CollectionKind::Stdin);
        if let Some(idx) = idx {
            let rows = lines
                .into_iter()
                .map(|line| LineagedRow::bare(vec![Value::Text(line)]))
                .collect();
            self.apply_merge(None, idx, rows)?;
        }
        Ok(())
    }

    /// Alternates receiving and ticking until `stop` is set, waking early
    /// for periodic deadlines and draining pending stdin lines before each
    /// tick. Non-fatal receive errors are logged and skipped.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        info!(self.log, "node running"; "endpoint" => %self.bus.endpoint());
        while !stop.load(Ordering::SeqCst) {
            let timeout = self
                .nearest_periodic_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(POLL_INTERVAL)
                .min(POLL_INTERVAL);
            match self.receive_timeout(timeout) {
                Ok(_) => {}
                Err(Error::Network(ref msg)) | Err(Error::Serialization(ref msg)) => {
                    warn!(self.log, "dropped inbound message"; "error" => %msg);
                }
                Err(e) => return Err(e),
            }
            self.drain_stdin()?;
            self.fire_periodics()?;
            self.tick()?;
        }
        info!(self.log, "node stopped");
        Ok(())
    }

    /// Registers black-box lineage for a request/response channel pair: one
    /// SQL function whose body the caller supplies (receiving the positional
    /// argument references for the insertion time, the request payload
    /// columns, and the response payload columns), and one dispatch function
    /// that joins the two channels on their `id` columns and applies it.
    pub fn register_black_box_lineage<F>(
        &mut self,
        request: &CollectionHandle,
        response: &CollectionHandle,
        body: F,
    ) -> Result<()>
    where
        F: Fn(&str, &[String], &[String]) -> String,
    {
        let (req_name, req_args, req_types) = {
            let c = &self.collections[request.id];
            if c.kind() != CollectionKind::Channel {
                return Err(Error::schema("black-box request must be a channel"));
            }
            if c.column_names().len() < 3 || c.column_names()[2] != "id" {
                return Err(Error::schema(
                    "black-box request needs columns (dst, src, id, ...)",
                ));
            }
            (
                c.name().to_owned(),
                c.column_names()[3..].to_vec(),
                c.schema()[3..].to_vec(),
            )
        };
        let (resp_name, resp_args, resp_types) = {
            let c = &self.collections[response.id];
            if c.kind() != CollectionKind::Channel {
                return Err(Error::schema("black-box response must be a channel"));
            }
            if c.column_names().len() < 2 || c.column_names()[1] != "id" {
                return Err(Error::schema(
                    "black-box response needs columns (addr, id, ...)",
                ));
            }
            (
                c.name().to_owned(),
                c.column_names()[2..].to_vec(),
                c.schema()[2..].to_vec(),
            )
        };

        let impl_name = format!("{}_{}_lineage_impl", self.name, resp_name);
        let fn_name = format!("{}_{}_lineage", self.name, resp_name);

        let mut arg_types = vec!["integer".to_owned()];
        arg_types.extend(req_types.iter().map(|&t| self.sql_mapping.sql_type(t)));
        arg_types.extend(resp_types.iter().map(|&t| self.sql_mapping.sql_type(t)));
        let arg_refs: Vec<String> = (1..=arg_types.len()).map(|i| format!("${}", i)).collect();
        let body_sql = body(
            &arg_refs[0],
            &arg_refs[1..1 + req_args.len()],
            &arg_refs[1 + req_args.len()..],
        );

        let impl_sql = format!(
            r"CREATE FUNCTION {}({})
RETURNS TABLE(collection_name text, hash bigint, time_inserted integer)
AS $${}$$ LANGUAGE SQL;",
            impl_name,
            arg_types.join(", "),
            body_sql
        );

        let mut call_args = vec!["Req.time_inserted".to_owned()];
        call_args.extend(req_args.iter().map(|c| format!("Req.{}", c)));
        call_args.extend(resp_args.iter().map(|c| format!("Resp.{}", c)));
        let dispatch_sql = format!(
            r"CREATE FUNCTION {}(bigint)
RETURNS TABLE(collection_name text, hash bigint, time_inserted integer)
AS $$
  SELECT {}({})
  FROM {}_{} Req, {}_{} Resp
  WHERE Req.id = $1 AND Resp.id = $1
$$ LANGUAGE SQL;",
            fn_name,
            impl_name,
            call_args.join(", "),
            self.name,
            req_name,
            self.name,
            resp_name
        );

        self.lineage.exec(&impl_name, &impl_sql)?;
        self.lineage.exec(&fn_name, &dispatch_sql)?;
        debug!(self.log, "registered black-box lineage"; "response" => %resp_name);
        Ok(())
    }
}

/// Adds `rows` to `buffer`, folding duplicate rows together and unioning
/// their lineage.
fn stage<I>(buffer: &mut Vec<LineagedRow>, rows: I)
where
    I: IntoIterator<Item = LineagedRow>,
{
    for lr in rows {
        if let Some(existing) = buffer.iter_mut().find(|b| b.row == lr.row) {
            for dep in lr.lineage {
                if !existing.lineage.contains(&dep) {
                    existing.lineage.push(dep);
                }
            }
        } else {
            buffer.push(lr);
        }
    }
}
