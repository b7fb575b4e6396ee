use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use delock::{DeadlockError, Delock, LockConfig, Mutex, RwLock, flush_logs};
use rand::Rng;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Delock - workloads that show timeout-based deadlock reports"
)]
struct Cli {
    /// Write a JSON-lines event log to this path ("{timestamp}" is expanded)
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    /// Lock timeout in milliseconds (defaults to DELOCK_TIMEOUT or 1000)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    workload: Workload,
}

#[derive(Subcommand)]
enum Workload {
    /// A method that takes a mutex and calls itself while holding it
    Recursive,
    /// Parents and children locking each other in inverted order
    ParentChild {
        /// Number of children to add
        #[arg(long, default_value_t = 20)]
        children: usize,
        /// Pause between child additions and between child updates
        #[arg(long, default_value_t = 10)]
        interval_ms: u64,
        /// Release the child lock before touching the parent
        #[arg(long)]
        fixed: bool,
        /// Stop after this many seconds without a deadlock
        #[arg(long, default_value_t = 10)]
        duration_secs: u64,
    },
    /// Many short-lived threads bumping one counter
    Churn {
        /// Number of threads to start
        #[arg(long, default_value_t = 200)]
        threads: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut delock = Delock::new();
    if let Some(path) = &cli.log {
        delock = delock.with_log(path);
    }
    delock.start()?;

    let mut config = LockConfig::from_env();
    if let Some(ms) = cli.timeout_ms {
        config = config.with_timeout(Duration::from_millis(ms));
    }

    let outcome = match cli.workload {
        Workload::Recursive => recursive(config),
        Workload::ParentChild {
            children,
            interval_ms,
            fixed,
            duration_secs,
        } => parent_child(
            config,
            children,
            Duration::from_millis(interval_ms),
            fixed,
            Duration::from_secs(duration_secs),
        ),
        Workload::Churn { threads } => churn(config, threads),
    };

    flush_logs()?;
    outcome
}

struct Counter {
    value: Mutex<u64>,
}

impl Counter {
    fn execute(&self, depth: u32) -> Result<(), DeadlockError> {
        let mut value = self.value.lock()?;
        *value += 1;
        println!("depth {depth}: value {}", *value);
        thread::sleep(Duration::from_millis(100));
        self.execute(depth + 1)
    }
}

fn recursive(config: LockConfig) -> Result<()> {
    let counter = Counter {
        value: Mutex::with_config(0, config),
    };
    match counter.execute(0) {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("{e}");
            bail!("lock timed out after {:?}", e.waited)
        }
    }
}

struct ParentState {
    items: Vec<Arc<Child>>,
    last_id: usize,
    num_changes: u64,
}

struct Parent {
    state: RwLock<ParentState>,
    config: LockConfig,
}

struct ChildState {
    value: String,
    id: usize,
}

struct Child {
    state: RwLock<ChildState>,
    parent: Weak<Parent>,
}

impl Parent {
    fn add(self: &Arc<Self>, value: String) -> Result<usize, DeadlockError> {
        let mut state = self.state.write()?;
        state.last_id += 1;
        let id = state.last_id;
        let child = Child {
            state: RwLock::with_config(ChildState { value, id }, self.config.clone()),
            parent: Arc::downgrade(self),
        };
        state.items.push(Arc::new(child));
        Ok(id)
    }

    fn child_by_id(&self, id: usize) -> Result<Option<Arc<Child>>, DeadlockError> {
        let state = self.state.read()?;
        for item in &state.items {
            if item.id()? == id {
                return Ok(Some(Arc::clone(item)));
            }
        }
        Ok(None)
    }

    fn num_changes(&self) -> Result<u64, DeadlockError> {
        Ok(self.state.read()?.num_changes)
    }

    fn increase_num_changes(&self) -> Result<(), DeadlockError> {
        self.state.write()?.num_changes += 1;
        Ok(())
    }
}

impl Child {
    fn id(&self) -> Result<usize, DeadlockError> {
        Ok(self.state.read()?.id)
    }

    /// Holds the child lock while taking the parent lock
    fn set_value(&self, value: String) -> Result<(), DeadlockError> {
        let mut state = self.state.write()?;
        state.value = value;
        if let Some(parent) = self.parent.upgrade() {
            parent.increase_num_changes()?;
        }
        Ok(())
    }

    fn set_value_fixed(&self, value: String) -> Result<(), DeadlockError> {
        self.state.write()?.value = value;
        if let Some(parent) = self.parent.upgrade() {
            parent.increase_num_changes()?;
        }
        Ok(())
    }
}

fn parent_child(
    config: LockConfig,
    children: usize,
    interval: Duration,
    fixed: bool,
    duration: Duration,
) -> Result<()> {
    let parent = Arc::new(Parent {
        state: RwLock::with_config(
            ParentState {
                items: Vec::new(),
                last_id: 0,
                num_changes: 0,
            },
            config.clone(),
        ),
        config,
    });
    let (errors, failures) = mpsc::channel::<DeadlockError>();

    let adder = Arc::clone(&parent);
    let adder_errors = errors.clone();
    thread::spawn(move || {
        for i in 0..children {
            thread::sleep(interval);
            match adder.add(format!("child{i}")) {
                Ok(id) => spawn_updater(Arc::clone(&adder), id, interval, fixed, adder_errors.clone()),
                Err(e) => {
                    let _ = adder_errors.send(e);
                    return;
                }
            }
        }
    });

    let started = Instant::now();
    while started.elapsed() < duration {
        match failures.recv_timeout(Duration::from_secs(1)) {
            Ok(e) => {
                eprintln!("{e}");
                bail!("{:?} lock timed out after {:?}", e.kind, e.waited);
            }
            Err(RecvTimeoutError::Timeout) => match parent.num_changes() {
                Ok(n) => println!("{n} changes"),
                Err(e) => {
                    eprintln!("{e}");
                    bail!("reading the change count timed out");
                }
            },
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    println!("no deadlock within {duration:?}");
    Ok(())
}

fn spawn_updater(
    parent: Arc<Parent>,
    id: usize,
    interval: Duration,
    fixed: bool,
    errors: Sender<DeadlockError>,
) {
    thread::spawn(move || {
        loop {
            thread::sleep(interval);
            let result = parent.child_by_id(id).and_then(|child| match child {
                Some(child) if fixed => child.set_value_fixed(format!("child{id}")),
                Some(child) => child.set_value(format!("child{id}")),
                None => Ok(()),
            });
            if let Err(e) = result {
                let _ = errors.send(e);
                return;
            }
        }
    });
}

fn churn(config: LockConfig, threads: usize) -> Result<()> {
    let counter = Arc::new(Mutex::with_config(0u64, config));
    let mut handles = Vec::with_capacity(threads);

    for _ in 0..threads {
        let counter = Arc::clone(&counter);
        let pause = Duration::from_millis(rand::rng().random_range(0..200));
        handles.push(thread::spawn(move || -> Result<(), DeadlockError> {
            thread::sleep(pause);
            *counter.lock()? += 1;
            Ok(())
        }));
    }

    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                eprintln!("{e}");
                bail!("counter lock timed out");
            }
            Err(_) => bail!("worker thread panicked"),
        }
    }

    println!(
        "{} increments, {} attempts left on the lock",
        *counter.lock()?,
        counter.raw().live_attempts()
    );
    Ok(())
}
