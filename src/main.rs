use std::{fs, path::PathBuf, thread};

use color_eyre::eyre::{self, WrapErr};
use crossbeam::channel::{self, Sender};

use hiersim::{trace::EventBlock, Error, Event, Hierarchy, ReplacementPolicy, SimConfig, Trace};

struct Args {
    config: SimConfig,
    trace: PathBuf,
    stats: Option<PathBuf>,
    warmup: u64,
    instructions: u64,
    heartbeat: u64,
    buffer_size: usize,
    queue_size: usize,
    repeat: bool,
}

impl Args {
    fn parse() -> eyre::Result<Self> {
        let mut args = pico_args::Arguments::from_env();
        let warmup = args.opt_value_from_str("-w")?.unwrap_or(50_000_000);
        let instructions = args.opt_value_from_str("-i")?.unwrap_or(100_000_000);
        let heartbeat = args.opt_value_from_str("-h")?.unwrap_or(0);
        let buffer_size = args.opt_value_from_str("--buffer-size")?.unwrap_or(1024 * 16);
        let queue_size = args.opt_value_from_str("--queue-size")?.unwrap_or(32);
        let repeat = !args.contains("--no-repeat");
        let stats = args.opt_value_from_str("--json")?;

        let mut config = if let Some(json) = args.opt_value_from_str::<_, String>("--config")? {
            SimConfig::from_json(&json)?
        } else if let Some(path) = args.opt_value_from_str::<_, PathBuf>("-p")? {
            let json = fs::read_to_string(&path)
                .wrap_err_with(|| format!("could not read config {}", path.display()))?;
            SimConfig::from_json(&json).wrap_err_with(|| format!("in {}", path.display()))?
        } else {
            log::info!("no config given, using the default hierarchy");
            SimConfig::default()
        };
        if let Some(policy) = args.opt_value_from_str::<_, ReplacementPolicy>("--replacement")? {
            config.replacement = policy;
        }

        let trace = args
            .opt_value_from_str("-t")?
            .ok_or_else(|| eyre::eyre!("must provide a trace with -t <path>"))?;

        let rest = args.finish();
        if !rest.is_empty() {
            log::warn!("ignoring unused arguments: {rest:?}");
        }

        Ok(Args {
            config,
            trace,
            stats,
            warmup,
            instructions,
            heartbeat,
            buffer_size,
            queue_size,
            repeat,
        })
    }
}

/// Pulls single events out of the trace's blocks, keeping the rest of a
/// block for the next phase.
struct Feed {
    trace: Trace,
    block: EventBlock,
    pos: usize,
}

impl Feed {
    fn next(&mut self) -> Result<Option<Event>, Error> {
        if self.pos == self.block.len() {
            match self.trace.rec.recv() {
                Ok(block) => {
                    self.block = block?;
                    self.pos = 0;
                }
                Err(_) => return Ok(None),
            }
        }
        let event = self.block.get(self.pos).copied();
        self.pos += 1;
        Ok(event)
    }
}

struct Phase {
    name: &'static str,
    instructions: u64,
    heartbeat: u64,
    batch: usize,
    queue_size: usize,
}

impl Phase {
    /// Runs until `instructions` fetches were simulated or the trace ended.
    /// Returns the number of fetches.
    fn run(&self, hierarchy: &mut Hierarchy, feed: &mut Feed) -> Result<u64, Error> {
        let threads = hierarchy.threads();
        let cores = hierarchy.cores();
        thread::scope(|s| {
            let senders: Vec<Sender<EventBlock>> = cores
                .into_iter()
                .map(|mut core| {
                    let (tx, rx) = channel::bounded::<EventBlock>(self.queue_size);
                    s.spawn(move || {
                        for block in rx {
                            for event in &block {
                                core.on_event(event);
                            }
                        }
                    });
                    tx
                })
                .collect();
            self.dispatch(feed, &senders, threads)
        })
    }

    fn dispatch(&self, feed: &mut Feed, senders: &[Sender<EventBlock>], threads: usize) -> Result<u64, Error> {
        let mut pending: Vec<EventBlock> = vec![Vec::with_capacity(self.batch); threads];
        let mut fetched = 0;
        let mut next_heartbeat = self.heartbeat;
        let flush = |tid: usize, pending: &mut Vec<EventBlock>| {
            let block = std::mem::replace(&mut pending[tid], Vec::with_capacity(self.batch));
            // a worker only goes away if it panicked, which the scope reports
            let _ = senders[tid].send(block);
        };

        while fetched < self.instructions {
            let Some(event) = feed.next()? else {
                log::info!("{}: trace ended after {fetched} instructions", self.name);
                break;
            };
            let tid = event.thread();
            if tid >= threads {
                return Err(Error::ThreadOutOfRange { tid, threads });
            }
            if let Event::Fetch { .. } = event {
                fetched += 1;
            }
            pending[tid].push(event);
            if pending[tid].len() >= self.batch {
                flush(tid, &mut pending);
            }
            if self.heartbeat != 0 && fetched >= next_heartbeat {
                log::info!("{}: {fetched} instructions", self.name);
                next_heartbeat += self.heartbeat;
            }
        }
        for tid in 0..threads {
            if !pending[tid].is_empty() {
                flush(tid, &mut pending);
            }
        }
        Ok(fetched)
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse()?;
    let mut hierarchy = Hierarchy::new(&args.config)?;
    let trace = Trace::read(&args.trace, args.buffer_size, args.queue_size, args.repeat)
        .wrap_err_with(|| format!("could not open trace {}", args.trace.display()))?;
    let mut feed = Feed {
        trace,
        block: Vec::new(),
        pos: 0,
    };

    let phase = |name, instructions| Phase {
        name,
        instructions,
        heartbeat: args.heartbeat,
        batch: args.buffer_size.max(1),
        queue_size: args.queue_size.max(1),
    };

    if args.warmup > 0 {
        let warmed = phase("warmup", args.warmup).run(&mut hierarchy, &mut feed)?;
        hierarchy.clear_stats();
        log::info!("finished warmup after {warmed} instructions");
    }
    let ran = phase("measure", args.instructions).run(&mut hierarchy, &mut feed)?;
    log::info!("ran {ran} instructions");

    let stats = hierarchy.stats();
    for level in &stats.levels {
        log::info!(
            "{:>6}: {:>12} accesses {:>12} misses  mpki {:.3}",
            level.name,
            level.all.total.accesses,
            level.all.total.misses,
            level.all.mpki.unwrap_or(0.0),
        );
    }
    log::info!(
        "page walks: {}, fences elided: {}, executed: {}",
        stats.page_walks,
        stats.fences.elided,
        stats.fences.executed
    );

    match &args.stats {
        Some(path) => {
            let file = fs::File::create(path)
                .wrap_err_with(|| format!("cannot create {}", path.display()))?;
            serde_json::to_writer_pretty(file, &stats)?;
        }
        None => {
            serde_json::to_writer_pretty(std::io::stdout().lock(), &stats)?;
            println!();
        }
    }
    Ok(())
}
