//! mover-link - command-line bridge to the OpenMover controller
//!
//! ```bash
//! mover-link --port /dev/ttyUSB0 status
//! mover-link -c mover.toml upload route.kml --speed 1.5 --range 3
//! mover-link coords -o stored.json
//! mover-link --kind telnet --host 192.168.4.1 --tcp-port 23 mag-log -o mag.json
//! ```
//!
//! `status --watch` and `mag-log` poll until Ctrl-C, then write their
//! samples and exit.

use clap::{Parser, Subcommand, ValueEnum};
use mover_link::config::TransportKind;
use mover_link::poll::PollSession;
use mover_link::storage::{JsonFileSink, MemorySink, default_log_path};
use mover_link::transport;
use mover_link::{Command, Config, Error, Platform, PollOptions, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mover-link")]
#[command(version, about = "Command bridge for the OpenMover platform controller")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port path
    #[arg(long, global = true)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Host for tcp/telnet links
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port for tcp/telnet links
    #[arg(long, global = true)]
    tcp_port: Option<u16>,

    /// Transport kind
    #[arg(long, value_enum, global = true)]
    kind: Option<KindArg>,

    /// Response timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Serial,
    Tcp,
    Telnet,
}

impl From<KindArg> for TransportKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Serial => TransportKind::Serial,
            KindArg::Tcp => TransportKind::Tcp,
            KindArg::Telnet => TransportKind::Telnet,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
enum Cmd {
    /// List local serial ports
    Ports,
    /// Print the waypoint table stored on the controller
    Coords {
        /// Also save the reply as a JSON array (overwrites the file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Start the stored waypoint mission
    Navigate,
    /// Hand motor control to the serial link, or give it back
    Control {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Drive both motors directly (-255..=255)
    Motors {
        #[arg(allow_hyphen_values = true)]
        left: i32,
        #[arg(allow_hyphen_values = true)]
        right: i32,
    },
    /// Set both motors to zero
    StopMotors,
    /// Upload a KML track as a waypoint mission
    Upload {
        kml: PathBuf,
        #[arg(long, default_value = "1.0")]
        speed: f64,
        #[arg(long, default_value = "2.0")]
        range: f64,
        /// Use the legacy upload without speed/range
        #[arg(long)]
        legacy: bool,
    },
    /// Print one status snapshot, or keep polling with --watch
    Status {
        #[arg(long)]
        watch: bool,
        /// Poll interval for --watch
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Drive to a single coordinate
    Goto {
        #[arg(allow_hyphen_values = true)]
        lat: f64,
        #[arg(allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, default_value = "1.0")]
        speed: f64,
        #[arg(long, default_value = "2.0")]
        range: f64,
    },
    /// Start compass calibration
    Calibrate,
    /// Set per-motor bias correction
    Bias {
        #[arg(allow_hyphen_values = true)]
        left: f64,
        #[arg(allow_hyphen_values = true)]
        right: f64,
    },
    /// Log magnetometer samples to a JSON file until Ctrl-C
    MagLog {
        /// Output file (default maglog_<unix-seconds>.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Send a raw JSON command, e.g. '{"intent": 6}'
    Raw { json: String },
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    if let Err(e) = run(&cli, &config) {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Config file (if any) with command-line overrides applied
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(port) = &cli.port {
        config.link.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.link.baud_rate = baud;
    }
    if let Some(host) = &cli.host {
        config.link.host = host.clone();
    }
    if let Some(tcp_port) = cli.tcp_port {
        config.link.tcp_port = tcp_port;
    }
    if let Some(kind) = cli.kind {
        config.link.kind = kind.into();
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.exchange.timeout_ms = timeout_ms;
    }
    match &cli.command {
        Cmd::Status {
            interval_ms: Some(ms),
            ..
        }
        | Cmd::MagLog {
            interval_ms: Some(ms),
            ..
        } => config.poll.interval_ms = *ms,
        _ => {}
    }

    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    if let Cmd::Ports = cli.command {
        let ports = transport::available_ports()?;
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    log::info!("Connecting to {}", config.link.target());
    let platform = Platform::connect(config)?;

    match &cli.command {
        Cmd::Ports => {}
        Cmd::Coords { output: Some(path) } => {
            match platform.save_coordinates(&mut JsonFileSink::new(path))? {
                Some(saved) => println!("Saved stored coordinates to {}", saved),
                None => println!("No response from controller"),
            }
        }
        Cmd::Coords { output: None } => match platform.fetch_coordinates()? {
            Some(stored) => {
                println!("Stored coordinates ({} values):", stored.coordinates.len());
                for pair in stored.coordinates.chunks(2) {
                    match pair {
                        [lon, lat] => println!("  lon={lon}, lat={lat}"),
                        [single] => println!("  {single}"),
                        _ => {}
                    }
                }
            }
            None => println!("No response from controller"),
        },
        Cmd::Navigate => platform.start_navigation()?,
        Cmd::Control { state } => platform.set_control_mode(matches!(state, Toggle::On))?,
        Cmd::Motors { left, right } => platform.set_motor_pwm(*left, *right)?,
        Cmd::StopMotors => platform.stop_motors()?,
        Cmd::Upload {
            kml,
            speed,
            range,
            legacy,
        } => {
            let count = if *legacy {
                platform.upload_track_legacy(kml)?
            } else {
                platform.upload_track(kml, *speed, *range)?
            };
            println!("Uploaded {} {}", count, if *legacy { "values" } else { "waypoints" });
        }
        Cmd::Status { watch: false, .. } => match platform.status()? {
            Some(status) => println!("{}", status),
            None => println!("No response from controller"),
        },
        Cmd::Status { watch: true, .. } => watch_status(&platform, config)?,
        Cmd::Goto {
            lat,
            lon,
            speed,
            range,
        } => platform.goto(*lat, *lon, *speed, *range)?,
        Cmd::Calibrate => platform.calibrate_compass()?,
        Cmd::Bias { left, right } => platform.set_motor_bias(*left, *right)?,
        Cmd::MagLog { output, .. } => mag_log(&platform, config, output.clone())?,
        Cmd::Raw { json } => {
            let command = Command::from_json(json)?;
            match platform.raw(&command)? {
                Some(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                None if command.intent().expects_response() => {
                    println!("No response from controller")
                }
                None => {}
            }
        }
    }

    platform.link().close()
}

/// Ctrl-C flag; `true` while running
fn setup_ctrl_c_handler() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;
    Ok(running)
}

/// Block until Ctrl-C or until the worker gives up on a transport error
fn wait_for_shutdown(session: &PollSession, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) && !session.is_finished() {
        thread::sleep(Duration::from_millis(100));
    }
}

fn watch_status(platform: &Platform, config: &Config) -> Result<()> {
    let running = setup_ctrl_c_handler()?;
    let options = PollOptions::from_config(config);
    let mut session = platform.start_status_poll(options, Box::new(MemorySink::new()))?;
    println!("Polling status every {:?}, Ctrl-C to stop", options.interval);

    let mut printed = 0;
    while running.load(Ordering::SeqCst) && !session.is_finished() {
        let samples = session.samples();
        for sample in &samples[printed..] {
            match sample.parse::<mover_link::protocol::StatusSnapshot>() {
                Ok(status) => println!("{}\n", status),
                Err(_) => println!("{}", serde_json::to_string(sample)?),
            }
        }
        printed = samples.len();
        thread::sleep(Duration::from_millis(100));
    }

    let report = session.stop()?;
    println!(
        "Stopped after {:.1?}: {} snapshots, {} missed",
        report.elapsed, report.samples, report.gaps
    );
    Ok(())
}

fn mag_log(platform: &Platform, config: &Config, output: Option<PathBuf>) -> Result<()> {
    let running = setup_ctrl_c_handler()?;
    let path = output.unwrap_or_else(default_log_path);
    let options = PollOptions::from_config(config);

    let mut session = PollSession::new(
        Arc::clone(platform.link()),
        Command::log_magnetometer(),
        options,
        Box::new(JsonFileSink::new(&path)),
    )
    .with_observer(|sample| {
        println!(
            "magX={} magY={}",
            sample.get_f64("magX").map_or("N/A".into(), |v| v.to_string()),
            sample.get_f64("magY").map_or("N/A".into(), |v| v.to_string())
        );
    });
    session.start()?;
    println!(
        "Logging magnetometer to {} every {:?}, Ctrl-C to stop",
        path.display(),
        options.interval
    );

    wait_for_shutdown(&session, &running);
    let report = session.stop()?;
    println!("Saved {} samples to {}", report.samples, report.persisted);
    Ok(())
}
