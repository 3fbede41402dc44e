//! disksim console front end
//!
//! Usage: disksim [--sectors N] [--read-threshold N] [--write-threshold N] ...
//!
//! Reads commands from stdin, one per line:
//!   read <sector> [count]   queue a read (default 1 sector)
//!   write <sector> <text>   store text and queue a write
//!   show <sector>           print sector contents
//!   seek <sector>           validate a sector index
//!   stats                   print scheduler metrics
//!   help | quit

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use disksim::device::DEFAULT_TOTAL_SECTORS;
use disksim::io::scheduler::config::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_THRESHOLD, DEFAULT_SEEK_LATENCY_MS,
    DEFAULT_SERVICE_LATENCY_MS, DEFAULT_WRITE_THRESHOLD,
};
use disksim::io::{BackpressurePolicy, CompletionCallback, IoResult, Request, SeekPolicy};
use disksim::{BlockDevice, DeviceConfig, Scheduler, SchedulerConfig};

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Interactive simulated disk I/O scheduler")]
struct Cli {
    #[arg(long, default_value_t = 1, env = "DISKSIM_DEVICE_ID")]
    device_id: u32,

    #[arg(long, default_value_t = DEFAULT_TOTAL_SECTORS, env = "DISKSIM_SECTORS")]
    sectors: u64,

    #[arg(long, default_value_t = DEFAULT_READ_THRESHOLD)]
    read_threshold: usize,

    #[arg(long, default_value_t = DEFAULT_WRITE_THRESHOLD)]
    write_threshold: usize,

    /// Simulated read/write service time
    #[arg(long, default_value_t = DEFAULT_SERVICE_LATENCY_MS, env = "DISKSIM_LATENCY_MS")]
    latency_ms: u64,

    #[arg(long, default_value_t = DEFAULT_SEEK_LATENCY_MS)]
    seek_latency_ms: u64,

    /// Request queue capacity
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    capacity: usize,

    /// Fail submissions on a full queue instead of waiting
    #[arg(long)]
    reject_when_full: bool,

    /// Complete seek-sized requests after this many passes
    #[arg(long)]
    seek_limit: Option<u32>,
}

impl Cli {
    fn scheduler_config(&self) -> SchedulerConfig {
        let backpressure = if self.reject_when_full {
            BackpressurePolicy::Reject
        } else {
            BackpressurePolicy::Block
        };
        let seek_policy = self
            .seek_limit
            .map_or(SeekPolicy::Requeue, SeekPolicy::CompleteAfter);

        SchedulerConfig::new()
            .with_thresholds(self.read_threshold, self.write_threshold)
            .with_service_latency(Duration::from_millis(self.latency_ms))
            .with_seek_latency(Duration::from_millis(self.seek_latency_ms))
            .with_queue_capacity(self.capacity)
            .with_backpressure(backpressure)
            .with_seek_policy(seek_policy)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Read { sector: i64, count: usize },
    Write { sector: i64, data: String },
    Show(i64),
    Seek(i64),
    Stats,
    Help,
    Quit,
    Empty,
}

fn parse_sector(arg: Option<&str>) -> Result<i64, String> {
    let arg = arg.ok_or("missing sector")?;
    arg.parse()
        .map_err(|_| format!("invalid sector number: {}", arg))
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim_start()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace();

    match verb {
        "" => Ok(Command::Empty),
        "read" => {
            let sector = parse_sector(args.next())?;
            let count = match args.next() {
                Some(n) => n.parse().map_err(|_| format!("invalid count: {}", n))?,
                None => 1,
            };
            Ok(Command::Read { sector, count })
        }
        "write" => {
            let sector = parse_sector(args.next())?;
            let data = rest
                .split_once(char::is_whitespace)
                .map(|(_, data)| data.trim_start())
                .unwrap_or("");
            if data.is_empty() {
                return Err("missing data to write".to_string());
            }
            Ok(Command::Write {
                sector,
                data: data.to_string(),
            })
        }
        "show" => Ok(Command::Show(parse_sector(args.next())?)),
        "seek" => Ok(Command::Seek(parse_sector(args.next())?)),
        "stats" => Ok(Command::Stats),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command: {} (try `help`)", other)),
    }
}

fn describe_sector(device: &BlockDevice, sector: u64) -> String {
    match device.read_sector(sector) {
        Some(data) => format!(
            "Data in sector {}: {}.",
            sector,
            String::from_utf8_lossy(&data)
        ),
        None => format!("No data in sector {}.", sector),
    }
}

/// Completion output, printed from the dispatch thread
fn report_completion(device: &Arc<BlockDevice>, scheduler: &Arc<Scheduler>) -> CompletionCallback {
    let device = Arc::clone(device);
    let scheduler = Arc::clone(scheduler);
    Box::new(move |req: &Request| {
        println!(
            "completed {} request {} ({} sectors at {}) in {:?}",
            scheduler.classify(req.extent()),
            req.id(),
            req.extent(),
            req.sector(),
            req.age()
        );
        println!("{}", describe_sector(&device, req.sector()));
    })
}

fn run_command(
    device: &Arc<BlockDevice>,
    scheduler: &Arc<Scheduler>,
    command: Command,
) -> IoResult<()> {
    match command {
        Command::Read { sector, count } => {
            let sector = device.seek_sector(sector)?;
            let id = device.read(sector, count, Some(report_completion(device, scheduler)))?;
            println!("queued {} request {}", scheduler.classify(count), id);
        }
        Command::Write { sector, data } => {
            let sector = device.seek_sector(sector)?;
            let extent = data.len();
            let id = device.write(sector, data, Some(report_completion(device, scheduler)))?;
            println!("queued {} request {}", scheduler.classify(extent), id);
        }
        Command::Show(sector) => {
            let sector = device.seek_sector(sector)?;
            println!("{}", describe_sector(device, sector));
        }
        Command::Seek(sector) => {
            let sector = device.seek_sector(sector)?;
            println!("sector {} is valid", sector);
        }
        Command::Stats => {
            let s = scheduler.metrics().snapshot();
            println!(
                "submitted={} rejected={} reads={} writes={} seeks={} requeues={} \
                 callback_failures={} listener_failures={} depth={} pressure={:?} \
                 read_p99={:?} write_p99={:?}",
                s.requests_submitted,
                s.requests_rejected,
                s.reads_completed,
                s.writes_completed,
                s.seeks_completed,
                s.seek_requeues,
                s.callback_failures,
                s.listener_failures,
                s.queue_depth,
                s.backpressure_level,
                s.read_p99,
                s.write_p99
            );
        }
        Command::Help => {
            println!(
                "commands: read <sector> [count] | write <sector> <text> | show <sector> \
                 | seek <sector> | stats | quit"
            );
        }
        Command::Quit | Command::Empty => {}
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let device = Arc::new(BlockDevice::new(
        DeviceConfig::new(cli.device_id).with_total_sectors(cli.sectors),
    ));
    let scheduler = Arc::new(Scheduler::new(
        format!("scheduler-{}", cli.device_id),
        cli.scheduler_config(),
    ));
    device.set_scheduler(Arc::clone(&scheduler))?;
    scheduler.start()?;

    tracing::info!(
        device = cli.device_id,
        sectors = cli.sectors,
        read_threshold = cli.read_threshold,
        write_threshold = cli.write_threshold,
        "Starting disksim"
    );
    println!("Disk {} simulation. Type `help` for commands.", device.id());

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match parse_command(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => {
                if let Err(e) = run_command(&device, &scheduler, command) {
                    println!("error: {}", e);
                }
            }
            Err(msg) => println!("{}", msg),
        }
        io::stdout().flush()?;
    }

    scheduler.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("read 5"),
            Ok(Command::Read { sector: 5, count: 1 })
        );
        assert_eq!(
            parse_command("read 5 50"),
            Ok(Command::Read {
                sector: 5,
                count: 50
            })
        );
        assert_eq!(
            parse_command("write 3 hello  world"),
            Ok(Command::Write {
                sector: 3,
                data: "hello  world".to_string()
            })
        );
        assert_eq!(parse_command("show -1"), Ok(Command::Show(-1)));
        assert_eq!(parse_command("  "), Ok(Command::Empty));
        assert_eq!(parse_command("quit"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("read").is_err());
        assert!(parse_command("read x").is_err());
        assert!(parse_command("write 3").is_err());
        assert!(parse_command("format").is_err());
    }

    #[test]
    fn test_describe_sector() {
        let device = BlockDevice::new(DeviceConfig::new(1));
        assert_eq!(describe_sector(&device, 0), "No data in sector 0.");
    }
}
