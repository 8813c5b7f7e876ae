//! Binary entrypoint for the lorabridge CLI.
//!
//! Commands:
//! - `start [--port <path>] [--daemon]` - run the gateway
//! - `init` - write a starter `config.toml`
//! - `status` - print the effective configuration
//! - `devices [<file>]` - validate and list a static devices file
//!
//! See the library crate docs for module-level details: `lorabridge::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use lorabridge::config::Config;
use lorabridge::gateway::Gateway;
use lorabridge::scheduler::SchedulerSettings;
use lorabridge::static_devices;

#[derive(Parser)]
#[command(name = "lorabridge")]
#[command(about = "Bridge a serial LoRa concentrator to an MQTT broker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Start {
        /// Gate serial port (overrides the config file)
        #[arg(short, long)]
        port: Option<String>,

        /// Run as a background daemon (Unix only)
        #[arg(short, long)]
        daemon: bool,

        /// PID file location (for daemon mode)
        #[arg(long, default_value = "/tmp/lorabridge.pid")]
        pid_file: String,
    },
    /// Write a default configuration file
    Init,
    /// Show the effective configuration
    Status,
    /// Validate a static devices file and list its records
    Devices {
        /// File to check (defaults to gate.static_devices_file)
        file: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Daemon start initializes logging in the child, after the fork.
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    match &cli.command {
        Commands::Start { daemon, .. } if *daemon => {}
        Commands::Init => {}
        _ => init_logging(&pre_config, cli.verbose),
    }

    match cli.command {
        Commands::Start {
            port,
            daemon,
            pid_file,
        } => {
            let mut config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };

            #[cfg(all(unix, feature = "daemon"))]
            if daemon {
                daemonize_process(&config, &pid_file)?;
                init_logging(&Some(config.clone()), cli.verbose);
            }

            #[cfg(not(all(unix, feature = "daemon")))]
            if daemon {
                let _ = pid_file;
                eprintln!("Error: Daemon mode requires Unix platform and 'daemon' feature.");
                eprintln!("Compile with: cargo build --features daemon");
                std::process::exit(1);
            }

            if let Some(port) = port {
                config.gate.port = port;
            }
            info!("Starting lorabridge v{}", env!("CARGO_PKG_VERSION"));
            let gateway = Gateway::open(config)?;
            gateway.run().await?;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            Config::create_default(&cli.config).await?;
            println!("Wrote default configuration to {}", cli.config);
            println!("Edit [gate] port and [mqtt] host, then run: lorabridge start");
        }
        Commands::Status => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            print_status(&cli.config, &config);
        }
        Commands::Devices { file } => {
            let path = match file.or_else(|| {
                pre_config
                    .as_ref()
                    .and_then(|c| c.gate.static_devices_file.clone())
            }) {
                Some(p) => p,
                None => anyhow::bail!("no file given and gate.static_devices_file is not set"),
            };
            let text = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?;
            let (devices, rejected) = static_devices::parse_str(&text);
            for dev in &devices {
                println!("{}", dev);
            }
            for r in &rejected {
                eprintln!("{}:{}: {}", path, r.line_no, r.error);
            }
            println!("{} devices, {} rejected lines", devices.len(), rejected.len());
            if !rejected.is_empty() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn print_status(path: &str, config: &Config) {
    let sched = SchedulerSettings::from(&config.scheduler);
    println!("lorabridge v{} ({})", env!("CARGO_PKG_VERSION"), path);
    println!(
        "  gate:      {} @ {} baud, poll {} ms, channel {}",
        config.gate.port,
        config.gate.baud_rate,
        config.gate.poll_interval_ms,
        config.gate.channel_capacity
    );
    match &config.gate.static_devices_file {
        Some(f) => println!("  static:    {}", f),
        None => println!("  static:    (none)"),
    }
    println!(
        "  mqtt:      {}:{} as '{}', prefix '{}'{}, qos {}",
        config.mqtt.host,
        config.mqtt.port,
        config.mqtt.client_id,
        config.mqtt.topic_prefix,
        if config.mqtt.miso_mosi { " (miso/mosi)" } else { "" },
        config.mqtt.qos
    );
    println!(
        "  retries:   every {:?}, max {}; invites every n*{:?}, max {}, after {} misses",
        sched.retry_timeout,
        sched.max_retries,
        sched.invite_timeout,
        sched.max_invite_retries,
        sched.retries_before_invite
    );
    println!("  registry:  {} devices", config.registry.capacity);
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Foreground runs mirror the file to the console; a daemon's stdout
        // is already the log file.
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

/// Daemonize the process (Unix only)
///
/// Re-spawns the binary without `--daemon`, detached from the terminal with
/// stdout/stderr appended to the log file, writes the PID file and exits.
#[cfg(all(unix, feature = "daemon"))]
fn daemonize_process(config: &Config, pid_file: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::process::Command;

    let log_path = config.logging.file.as_deref().unwrap_or("lorabridge.log");

    let current_exe = std::env::current_exe()?;
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().position(|arg| arg == "--daemon" || arg == "-d") {
        args.remove(pos);
    }
    let child_args = args.get(1..).unwrap_or(&[]);

    let log_file = OpenOptions::new().create(true).append(true).open(log_path)?;
    let child = Command::new(&current_exe)
        .args(child_args)
        .stdin(std::process::Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .spawn()?;

    std::fs::write(pid_file, format!("{}", child.id()))?;
    std::process::exit(0);
}
