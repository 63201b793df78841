//! Assembling a node: collection declarations, rule registration, and the
//! injectable collaborators, ending in an [`Executor`](crate::Executor).

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rill_basics::{
    node_id, CollectionKind, Error, FnvRowHash, Result, SharedClock, SharedRowHash, SystemClock,
    Type,
};
use rill_channel::BusContext;
use rill_lineage::{LineageClient, PostgresMapping, SqlMapping};

use crate::collection::{Collection, CollectionId};
use crate::executor::Executor;
use crate::ra::Expr;
use crate::rule::{Rule, RuleKind};

/// A reference to a declared collection: its index within the node plus the
/// schema information rules are checked against. Cheap to clone.
#[derive(Clone, Debug)]
pub struct CollectionHandle {
    pub(crate) id: CollectionId,
    pub(crate) name: String,
    pub(crate) kind: CollectionKind,
    pub(crate) schema: Vec<Type>,
}

impl CollectionHandle {
    /// A query reading this collection's current tuples.
    pub fn scan(&self) -> Expr {
        Expr::Scan {
            id: self.id,
            name: self.name.clone(),
            schema: self.schema.clone(),
        }
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }
}

/// Accumulates a node's declarations and produces its executor.
///
/// Collections are declared first, in the order that becomes their index;
/// bootstrap rules (optional) and rules (required) follow; `build` binds the
/// bus endpoint and yields the executor. Each step reports the first
/// failure it detects.
pub struct Builder<L> {
    name: String,
    endpoint: String,
    bus_ctx: BusContext,
    lineage: L,

    collections: Vec<Collection>,
    bootstrap_rules: Vec<Rule>,
    rules: Vec<Rule>,
    bootstrap_registered: bool,
    rules_registered: bool,
    next_rule_id: usize,

    clock: SharedClock,
    hasher: SharedRowHash,
    pickler: Box<dyn crate::pickle::Pickler + Send>,
    sql_mapping: Box<dyn SqlMapping + Send>,
    stdout_sink: Box<dyn Write + Send>,
    stdin_feed: Option<Receiver<String>>,
    max_passes: usize,
    log: slog::Logger,
}

impl<L: LineageClient> Builder<L> {
    /// Starts a node named `name`, to be bound at `endpoint`, recording
    /// lineage through `lineage` (which is initialized here).
    pub fn new(name: &str, endpoint: &str, ctx: &BusContext, mut lineage: L) -> Result<Builder<L>> {
        if name.is_empty() {
            return Err(Error::config("node name must not be empty"));
        }
        lineage.init()?;
        Ok(Builder {
            name: name.to_owned(),
            endpoint: endpoint.to_owned(),
            bus_ctx: ctx.clone(),
            lineage,
            collections: Vec::new(),
            bootstrap_rules: Vec::new(),
            rules: Vec::new(),
            bootstrap_registered: false,
            rules_registered: false,
            next_rule_id: 0,
            clock: Arc::new(SystemClock::default()),
            hasher: Arc::new(FnvRowHash::default()),
            pickler: Box::new(crate::pickle::BincodePickler::default()),
            sql_mapping: Box::new(PostgresMapping::default()),
            stdout_sink: Box::new(io::stdout()),
            stdin_feed: None,
            max_passes: 1,
            log: slog::Logger::root(slog::Discard, o!()),
        })
    }

    pub fn with_logger(mut self, log: slog::Logger) -> Self {
        self.log = log;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_row_hash(mut self, hasher: SharedRowHash) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_pickler(mut self, pickler: Box<dyn crate::pickle::Pickler + Send>) -> Self {
        self.pickler = pickler;
        self
    }

    pub fn with_sql_mapping(mut self, mapping: Box<dyn SqlMapping + Send>) -> Self {
        self.sql_mapping = mapping;
        self
    }

    /// Redirects what `Stdout` collections print; used by tests to capture
    /// output.
    pub fn with_stdout_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.stdout_sink = sink;
        self
    }

    /// Supplies the line source for a `Stdin` collection in place of the
    /// process's standard input.
    pub fn with_stdin_feed(mut self, feed: Receiver<String>) -> Self {
        self.stdin_feed = Some(feed);
        self
    }

    /// How many evaluation passes a tick may take before it is declared
    /// non-terminating. The default of 1 evaluates every rule exactly once
    /// per tick; raise it for recursive monotone programs.
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    fn declarations_open(&self, name: &str) -> Result<()> {
        if self.bootstrap_registered || self.rules_registered {
            return Err(Error::schema(format!(
                "collection {:?} declared after rules were registered",
                name
            )));
        }
        Ok(())
    }

    fn declare(
        &mut self,
        name: &str,
        kind: CollectionKind,
        columns: &[(&str, Type)],
    ) -> Result<CollectionHandle> {
        self.declarations_open(name)?;
        if self.collections.iter().any(|c| c.name() == name) {
            return Err(Error::schema(format!(
                "duplicate collection name {:?}",
                name
            )));
        }
        if columns.is_empty() {
            return Err(Error::schema(format!(
                "collection {:?} must have at least one column",
                name
            )));
        }
        let column_names: Vec<String> = columns.iter().map(|&(n, _)| n.to_owned()).collect();
        let schema: Vec<Type> = columns.iter().map(|&(_, t)| t).collect();
        self.lineage
            .add_collection(name, kind, &column_names, &schema)?;
        let id = self.collections.len();
        self.collections
            .push(Collection::new(name, kind, column_names, schema.clone()));
        Ok(CollectionHandle {
            id,
            name: name.to_owned(),
            kind,
            schema,
        })
    }

    /// Declares a table: persistent state.
    pub fn table(&mut self, name: &str, columns: &[(&str, Type)]) -> Result<CollectionHandle> {
        self.declare(name, CollectionKind::Table, columns)
    }

    /// Declares a scratch: transient per-tick state.
    pub fn scratch(&mut self, name: &str, columns: &[(&str, Type)]) -> Result<CollectionHandle> {
        self.declare(name, CollectionKind::Scratch, columns)
    }

    /// Declares a channel. Column 0 is the destination endpoint and must be
    /// text.
    pub fn channel(&mut self, name: &str, columns: &[(&str, Type)]) -> Result<CollectionHandle> {
        match columns.first() {
            Some(&(_, Type::Text)) => {}
            _ => {
                return Err(Error::schema(format!(
                    "channel {:?} must have a text address as column 0",
                    name
                )));
            }
        }
        self.declare(name, CollectionKind::Channel, columns)
    }

    /// Declares the stdout sink collection.
    pub fn stdout(&mut self) -> Result<CollectionHandle> {
        self.declare("stdout", CollectionKind::Stdout, &[("line", Type::Text)])
    }

    /// Declares the stdin source collection. At most one per node.
    pub fn stdin(&mut self) -> Result<CollectionHandle> {
        if self
            .collections
            .iter()
            .any(|c| c.kind() == CollectionKind::Stdin)
        {
            return Err(Error::schema("a node may declare at most one stdin"));
        }
        self.declare("stdin", CollectionKind::Stdin, &[("line", Type::Text)])
    }

    /// Declares a periodic source firing every `period`.
    pub fn periodic(&mut self, name: &str, period: Duration) -> Result<CollectionHandle> {
        self.declarations_open(name)?;
        if self.collections.iter().any(|c| c.name() == name) {
            return Err(Error::schema(format!(
                "duplicate collection name {:?}",
                name
            )));
        }
        let c = Collection::periodic(name, period);
        self.lineage.add_collection(
            name,
            CollectionKind::Periodic,
            &c.column_names().to_vec(),
            &c.schema().to_vec(),
        )?;
        let id = self.collections.len();
        let handle = CollectionHandle {
            id,
            name: name.to_owned(),
            kind: CollectionKind::Periodic,
            schema: c.schema().to_vec(),
        };
        self.collections.push(c);
        Ok(handle)
    }

    /// Registers the rules run exactly once by `bootstrap_tick`.
    pub fn register_bootstrap_rules(&mut self, rules: Vec<Rule>) -> Result<()> {
        if self.bootstrap_registered {
            return Err(Error::config("bootstrap rules are already registered"));
        }
        self.bootstrap_registered = true;
        self.register(rules, true)
    }

    /// Registers the rules run on every tick.
    pub fn register_rules(&mut self, rules: Vec<Rule>) -> Result<()> {
        if self.rules_registered {
            return Err(Error::config("rules are already registered"));
        }
        self.rules_registered = true;
        self.register(rules, false)
    }

    fn register(&mut self, rules: Vec<Rule>, bootstrap: bool) -> Result<()> {
        for (i, mut rule) in rules.into_iter().enumerate() {
            if let Err(reason) = self.validate(&rule) {
                return Err(Error::schema(format!(
                    "rule {} ({}): {}",
                    i,
                    rule.text(),
                    reason
                )));
            }
            rule.id = self.next_rule_id;
            self.next_rule_id += 1;
            self.lineage.add_rule(rule.id, bootstrap, &rule.text())?;
            if bootstrap {
                self.bootstrap_rules.push(rule);
            } else {
                self.rules.push(rule);
            }
        }
        Ok(())
    }

    fn validate(&self, rule: &Rule) -> ::std::result::Result<(), String> {
        match rule.target_kind {
            CollectionKind::Stdin | CollectionKind::Periodic => {
                return Err(format!(
                    "a {} is read-only from rules",
                    rule.target_kind
                ));
            }
            CollectionKind::Stdout | CollectionKind::Channel
                if rule.kind == RuleKind::DeferredDelete =>
            {
                return Err(format!("cannot delete from a {}", rule.target_kind));
            }
            _ => {}
        }

        self.validate_scans(&rule.expr)?;

        let produced = rule.expr.column_types().map_err(|e| e.to_string())?;
        let target = self
            .collections
            .get(rule.target)
            .ok_or_else(|| format!("unknown target collection index {}", rule.target))?;
        if produced != target.schema() {
            return Err(format!(
                "produces columns {:?} but target {:?} has columns {:?}",
                produced,
                target.name(),
                target.schema()
            ));
        }
        Ok(())
    }

    fn validate_scans(&self, expr: &Expr) -> ::std::result::Result<(), String> {
        match *expr {
            Expr::Scan {
                id,
                ref name,
                ref schema,
            } => {
                let coll = self
                    .collections
                    .get(id)
                    .ok_or_else(|| format!("{:?} is not declared at this node", name))?;
                if coll.name() != name || coll.schema() != &schema[..] {
                    return Err(format!(
                        "{:?} refers to a collection from another node",
                        name
                    ));
                }
                Ok(())
            }
            Expr::Iterable { .. } => Ok(()),
            Expr::Map { ref input, .. }
            | Expr::Filter { ref input, .. }
            | Expr::Project { ref input, .. }
            | Expr::GroupBy { ref input, .. }
            | Expr::Count { ref input } => self.validate_scans(input),
            Expr::Cross {
                ref left,
                ref right,
            }
            | Expr::HashJoin {
                ref left,
                ref right,
                ..
            } => {
                self.validate_scans(left)?;
                self.validate_scans(right)
            }
        }
    }

    /// Binds the bus endpoint and produces the executor.
    pub fn build(mut self) -> Result<Executor<L>> {
        if !self.rules_registered {
            return Err(Error::config(
                "register_rules must be called before build",
            ));
        }

        let id = node_id(&self.name);
        let log = self.log.new(o!("node" => self.name.clone()));
        let bus = self.bus_ctx.bind(&self.endpoint, log.clone())?;

        let now = Instant::now();
        for c in &mut self.collections {
            c.arm(now);
        }

        let has_stdin = self
            .collections
            .iter()
            .any(|c| c.kind() == CollectionKind::Stdin);
        let stdin_feed = match (has_stdin, self.stdin_feed) {
            (false, feed) => feed,
            (true, Some(feed)) => Some(feed),
            (true, None) => Some(spawn_stdin_reader()?),
        };

        info!(log, "node built";
              "endpoint" => %bus.endpoint(),
              "collections" => self.collections.len(),
              "rules" => self.rules.len());

        Ok(Executor {
            name: self.name,
            id,
            collections: self.collections,
            bootstrap_rules: self.bootstrap_rules,
            rules: self.rules,
            bus,
            pickler: self.pickler,
            sql_mapping: self.sql_mapping,
            lineage: self.lineage,
            clock: self.clock,
            hasher: self.hasher,
            stdout_sink: self.stdout_sink,
            stdin_feed,
            time: 0,
            bootstrapped: false,
            ticked: false,
            max_passes: self.max_passes,
            log,
        })
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("rill-stdin".to_owned())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(_) => break,
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| Error::config(format!("cannot spawn stdin reader: {}", e)))?;
    Ok(rx)
}
