//! # Octopus control-plane runtime
//!
//! Wires together the cooperative task manager, the vehicle protocol
//! layer, the CarInfo task, and the IPC subsystem into one supervised
//! process.

use clap::Parser;
use octopus_carinfo::{CarInfoTask, ModelSnapshotSource, ModelStore};
use octopus_common::prelude::{ConfigLoader, SystemConfig};
use octopus_common::task::TaskId;
use octopus_hal::PosixSerialTransport;
use octopus_ipc::shutdown::{ignore_sigpipe, install_sigint_handler};
use octopus_ipc::{IpcServer, IpcTask, ThreadPool};
use octopus_ptl::{MessageQueue, ModuleRegistry, Ptl, PtlTask};
use octopus_taskmgr::descriptor::TaskDescriptor;
use octopus_taskmgr::scheduler::TaskManager;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Octopus vehicle instrument-cluster control-plane runtime.
#[derive(Parser, Debug)]
#[command(name = "octopus")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Vehicle instrument cluster control-plane runtime")]
struct Args {
    /// Path to the system configuration file (config.toml).
    #[arg(short, long, default_value = "/etc/octopus/config.toml")]
    config: PathBuf,

    /// Override the serial device path.
    #[arg(long)]
    serial_device: Option<String>,

    /// Override the serial baud rate.
    #[arg(long)]
    serial_baud: Option<u32>,

    /// Override the IPC socket path.
    #[arg(long)]
    ipc_socket_path: Option<String>,

    /// Override the scheduler tick interval, in milliseconds.
    #[arg(long)]
    task_tick_ms: Option<u32>,

    /// Enable verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("octopus startup failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(&args);
    ignore_sigpipe();

    info!("BOOT START");
    info!(version = env!("CARGO_PKG_VERSION"), "Octopus control-plane runtime starting");

    let mut config = match SystemConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            info!(path = %args.config.display(), error = %e, "no config file found, using defaults");
            SystemConfig::default()
        }
    };
    if let Some(device) = args.serial_device {
        config.serial_device = device;
    }
    if let Some(baud) = args.serial_baud {
        config.serial_baud = baud;
    }
    if let Some(path) = args.ipc_socket_path {
        config.ipc_socket_path = path;
    }
    if let Some(tick) = args.task_tick_ms {
        config.task_tick_ms = tick;
    }
    config.validate()?;

    let queue = Arc::new(MessageQueue::new());
    let registry = Arc::new(ModuleRegistry::new());
    let model = Arc::new(ModelStore::new());

    let ptl = Ptl::new(Arc::clone(&registry), config.ptl_acks_enabled);
    let transport = PosixSerialTransport::open(&config.serial_device, config.serial_baud)?;
    let ptl_task = PtlTask::new(transport, ptl, Arc::clone(&queue));

    let car_info_task = CarInfoTask::new(
        Arc::clone(&model),
        Arc::clone(&registry),
        Arc::clone(&queue),
        Box::new(|| None),
    );

    let snapshot_source: Arc<dyn octopus_ipc::SnapshotSource> =
        Arc::new(ModelSnapshotSource::new(Arc::clone(&model)));
    let ipc_server = Arc::new(IpcServer::bind(
        &config.ipc_socket_path,
        snapshot_source,
        config.default_push_interval_cs,
    )?);
    let ipc_task = IpcTask::new(Arc::clone(&ipc_server), Arc::clone(&queue));

    // Thread pool and bus are part of the IPC subsystem's ambient runtime;
    // a live deployment would wire client callbacks and bus subscribers to
    // this pool. The bare pool construction below keeps the dependency
    // alive and available to whatever extends this binary.
    let _pool = Arc::new(ThreadPool::new(
        config.threadpool_workers,
        config.threadpool_queue_size,
        octopus_ipc::OverflowStrategy::DropOldest,
    ));

    let manager = TaskManager::new(
        vec![
            TaskDescriptor::new(TaskId::CarInfo, Box::new(car_info_task)),
            TaskDescriptor::new(TaskId::Ptl, Box::new(ptl_task)),
            TaskDescriptor::new(TaskId::Ipc, Box::new(ipc_task)),
        ],
        config.task_tick_ms,
    );

    let task_stop = manager.stop_handle();
    let ipc_stop = ipc_server.stop_handle();
    install_sigint_handler(vec![task_stop, ipc_stop])?;

    info!("BOOT COMPLETE");
    let handle = manager.run();
    handle.join().map_err(|_| "scheduler thread panicked")?;

    info!("octopus shutdown complete");
    Ok(())
}

fn setup_tracing(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
