//! The alarm daemon (spec.md §6 "Daemon CLI"): loads a DSL configuration
//! file, then either performs a one-shot hardware query and exits, or starts
//! the request front-end and enters the state-machine event loop.

use std::{
    path::PathBuf,
    process,
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use alarmd::{
    console::Console,
    hardware::{Backend, Emulated, RealChip},
    port::{Kind, Registry},
    queue,
    server,
    state::{self, CurrentState},
    syslog::{Syslog, UnixSyslog},
    AlarmError,
};
use clap::Parser;

/// Default GPIO chip device node when running against real hardware.
const DEFAULT_CHIP: &str = "/dev/gpiochip0";
/// Default bind address for the localhost request front-end (spec.md §6).
const DEFAULT_BIND: &str = "127.0.0.1:5000";
/// Default sensor-marker directory (`original_source/src/alarmd/port.py`'s `SENSORPATH`).
const DEFAULT_SENSOR_DIR: &str = "/var/spool/alarm/sensor";
/// Default user-disable marker directory.
const DEFAULT_DISABLE_DIR: &str = "/var/spool/alarm/disable";
/// Default voice-message queue directory (`original_source/src/alarmd/vmqueue.py`'s `VMQDIR`).
const DEFAULT_VMQ_DIR: &str = "/var/spool/alarm/vmq";

#[derive(Parser)]
#[command(name = "alarmd", about = "Home security alarm daemon")]
struct Args {
    /// Path to the DSL configuration file.
    file: PathBuf,

    /// Run with debug tracing to stderr.
    #[arg(short, long)]
    debug: bool,

    /// Use the in-memory emulated GPIO backend instead of real hardware.
    #[arg(short, long)]
    emulate: bool,

    /// Print every configured port and exit.
    #[arg(short, long, conflicts_with_all = ["reset", "set", "values"])]
    list: bool,

    /// Set the named actuator low and exit.
    #[arg(short, long, value_name = "NAME", conflicts_with_all = ["list", "set", "values"])]
    reset: Option<String>,

    /// Set the named actuator high and exit.
    #[arg(short, long, value_name = "NAME", conflicts_with_all = ["list", "reset", "values"])]
    set: Option<String>,

    /// Print every sensor's current value and exit.
    #[arg(short, long, conflicts_with_all = ["list", "reset", "set"])]
    values: bool,

    /// GPIO chip device node to use when not emulating.
    #[arg(long, default_value = DEFAULT_CHIP)]
    chip: String,

    /// Address the request front-end binds to.
    #[arg(long, default_value = DEFAULT_BIND)]
    bind: String,

    /// Directory where "sensor fired" marker files are created.
    #[arg(long, default_value = DEFAULT_SENSOR_DIR)]
    sensor_dir: PathBuf,

    /// Directory external tooling uses to mark a sensor user-disabled.
    #[arg(long, default_value = DEFAULT_DISABLE_DIR)]
    disable_dir: PathBuf,

    /// Directory where `VmQueue` actions drop commands for the voice-message daemon.
    #[arg(long, default_value = DEFAULT_VMQ_DIR)]
    vmq_dir: PathBuf,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("alarmd: {e}");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), AlarmError> {
    let console = Console::new(args.debug);
    console.debug(&format!("loading configuration from {}", args.file.display()));

    let (registry, table) = alarmd::dsl::read(&args.file, args.sensor_dir.clone(), args.disable_dir.clone())?;

    if args.list {
        for name in registry.names() {
            let (kind, _) = registry.by_name(name).unwrap();
            let label = match kind {
                Kind::Sensor => "sensor",
                Kind::Actuator => "actuator",
            };
            println!("{name} ({label})");
        }
        return Ok(());
    }

    if args.emulate {
        one_shot_or_run(Emulated, true, &args, &registry, &table, console)
    } else {
        let chip = RealChip::open(&args.chip)?;
        one_shot_or_run(chip, false, &args, &registry, &table, console)
    }
}

fn one_shot_or_run<B: Backend>(
    backend: B,
    emulate: bool,
    args: &Args,
    registry: &Registry,
    table: &state::Table,
    console: Console,
) -> Result<(), AlarmError> {
    if let Some(name) = &args.set {
        registry.set_single_actuator(name, true, &backend)?;
        return Ok(());
    }
    if let Some(name) = &args.reset {
        registry.set_single_actuator(name, false, &backend)?;
        return Ok(());
    }
    if args.values {
        for name in registry.sensor_names() {
            let value = i32::from(registry.read_single_sensor(name, &backend)?);
            println!("{name}: {value}");
        }
        return Ok(());
    }

    let sys = UnixSyslog::connect().map_err(|e| AlarmError::Syslog(e.to_string()))?;
    sys.info(&format!("starting up: pid {}", process::id()));

    let (queue, recv) = queue::channel_pair();
    let current = CurrentState::new(table.initial.clone());

    let shutdown = AtomicBool::new(false);

    thread::scope(|scope| -> Result<(), AlarmError> {
        registry.request_lines(scope, &backend, &queue, &sys)?;

        let server_table = table;
        let server_registry = registry;
        let server_queue = queue.clone();
        let server_current = &current;
        let server_sys = &sys;
        let server_shutdown = &shutdown;
        scope.spawn(move || {
            if let Err(e) = server::run(&args.bind, server_table, server_registry, &server_queue, server_current, server_sys, server_shutdown) {
                eprintln!("alarmd: request front-end stopped: {e}");
            }
        });

        let ctx = state::Context {
            registry,
            queue: &queue,
            sys: &sys,
            table,
            emulate,
            current: &current,
            vmq_dir: &args.vmq_dir,
        };
        console.debug("entering state-machine event loop");
        let result = state::run(table, &recv, &ctx);
        shutdown.store(true, Ordering::Relaxed);
        result?;
        Ok(())
    })
}
