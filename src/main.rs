use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use futures::future::join_all;
use scoped_persistence::{
    AllQuery, Entity, FlushPolicy, KeyKind, MemorySession, MemoryStore, Persistence,
    PersistenceOptions, Relation, Repository, TransactionMode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "scoped-persistence")]
#[command(about = "Runs unit-of-work workloads against the in-memory store")]
struct Cli {
    /// Units of work to run
    #[arg(long, default_value_t = 100)]
    runs: usize,

    /// Units of work in flight at once
    #[arg(long, default_value_t = 8)]
    parallel: usize,

    /// Borrow sessions from a pool
    #[arg(long)]
    pool: bool,

    /// Idle sessions the pool keeps
    #[arg(long)]
    max_pooled: Option<usize>,

    /// auto, manual or suppressed
    #[arg(long, default_value = "auto")]
    flush: FlushPolicy,

    #[arg(long, value_enum, default_value_t = Mode::Scoped)]
    mode: Mode,

    /// Fail every n-th unit of work after its writes (0 = never)
    #[arg(long, default_value_t = 0)]
    fail_every: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Scoped,
    Session,
}

impl From<Mode> for TransactionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Scoped => TransactionMode::Scoped,
            Mode::Session => TransactionMode::Session,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Bar {
    bar_id: Uuid,
    name: String,
}

impl Entity for Bar {
    type Id = Uuid;
    const TABLE: &'static str = "bars";
    const KEY: &'static str = "bar_id";
    const KEY_KIND: KeyKind = KeyKind::Uuid;

    fn id(&self) -> Uuid {
        self.bar_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Foo {
    foo_id: i64,
    name: String,
    bar_id: Option<Uuid>,
    #[serde(default)]
    bar: Option<Bar>,
}

impl Entity for Foo {
    type Id = i64;
    const TABLE: &'static str = "foos";
    const KEY: &'static str = "foo_id";

    fn id(&self) -> i64 {
        self.foo_id
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::new("bar", "bar_id", "bars")]
    }
}

#[derive(Debug, thiserror::Error)]
#[error("run {0} failed on purpose")]
struct PlannedFailure(usize);

struct Workload {
    persistence: Persistence<MemorySession>,
    foos: Repository<Foo, MemorySession>,
    bars: Repository<Bar, MemorySession>,
    fail_every: usize,
    failed: AtomicUsize,
}

impl Workload {
    /// One unit of work: a foo with a new bar, then a rename of that bar.
    async fn run_one(self: Arc<Self>, run: usize) -> Result<()> {
        let uow = self.persistence.unit_of_work();
        let mut scope = self.persistence.scope();
        let workload = Arc::clone(&self);

        let result = uow
            .run_async(&mut scope, move |mut scope| async move {
                let foo = Foo {
                    foo_id: 0,
                    name: format!("foo-{}", run),
                    bar_id: None,
                    bar: Some(Bar {
                        bar_id: Uuid::nil(),
                        name: format!("bar-{}", run),
                    }),
                };
                let foo = workload.foos.add_async(&mut scope, foo).await?;

                let mut bar = foo.bar.ok_or_else(|| anyhow!("foo {} lost its bar", foo.foo_id))?;
                bar.name.push_str("-renamed");
                workload.bars.update(&mut scope, bar)?;

                if workload.fail_every > 0 && (run + 1) % workload.fail_every == 0 {
                    return Err(PlannedFailure(run).into());
                }
                Ok::<(), anyhow::Error>(())
            })
            .await;

        match result {
            Err(err) if err.is::<PlannedFailure>() => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            other => other,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let store = MemoryStore::builder()
        .register::<Bar>()
        .register::<Foo>()
        .build()?;

    let mut options = PersistenceOptions::new()
        .use_session_pool(cli.pool)
        .flush_policy(cli.flush)
        .transaction_mode(cli.mode.into());
    if let Some(max) = cli.max_pooled {
        options = options.max_pooled_sessions(max);
    }

    let persistence = Persistence::memory(&store, options)?;
    let workload = Arc::new(Workload {
        foos: persistence.repository::<Foo>(),
        bars: persistence.repository::<Bar>(),
        persistence,
        fail_every: cli.fail_every,
        failed: AtomicUsize::new(0),
    });

    let started = std::time::Instant::now();
    let runs: Vec<usize> = (0..cli.runs).collect();
    for batch in runs.chunks(cli.parallel.max(1)) {
        let handles = batch
            .iter()
            .map(|&run| tokio::spawn(Arc::clone(&workload).run_one(run)));

        for joined in join_all(handles).await {
            joined.context("Workload task panicked")??;
        }
    }
    let elapsed = started.elapsed();

    let mut scope = workload.persistence.scope();
    let sample = workload.foos.query_fn_with(
        &mut scope,
        |foos| foos.order_by(|foo| foo.foo_id).take(3),
        ["bar"],
    )?;
    let foo_count = workload.foos.count(&mut scope, &AllQuery::<Foo>::new())?;

    println!("Completed {} units of work in {:?}", cli.runs, elapsed);
    println!(
        "Failed on purpose: {}",
        workload.failed.load(Ordering::SeqCst)
    );
    println!(
        "Rows: {} foos ({} counted), {} bars",
        store.row_count(Foo::TABLE)?,
        foo_count,
        store.row_count(Bar::TABLE)?
    );
    println!(
        "Sessions: {} created, {} alive",
        store.sessions_created(),
        store.sessions_alive()
    );
    match workload.persistence.pool_stats() {
        Some(stats) => println!("{}", stats),
        None => println!("Pool Stats: pooling disabled"),
    }

    for foo in sample {
        let bar = foo.bar.map(|bar| bar.name).unwrap_or_else(|| "-".to_string());
        println!("  foo #{} {} -> {}", foo.foo_id, foo.name, bar);
    }

    Ok(())
}
