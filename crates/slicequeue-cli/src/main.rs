//! slicequeue - operator command line for the slicing job pipeline
//!
//! Usage: slicequeue [--config <FILE>] <COMMAND>
//!
//! Commands:
//!   init      Create the database and media directory
//!   material  Register and list materials
//!   order     Place, inspect and advance orders
//!   submit    Queue a slice of an already registered file
//!   status    Show the status of a queued job
//!   work      Run the worker pool until Ctrl+C

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use slicequeue::db::{material_repo, Database};
use slicequeue::worker::crossbeam_channel;
use slicequeue::{
    load_config, logging, CommandSlicer, Config, GeometryStore, JobQueue, NewOrder,
    OrderService, Pipeline, PoolSettings, PricingPolicy, ShippingDetails, Upload, WorkerPool,
};

/// Asynchronous slicing pipeline for print-on-demand orders
#[derive(Parser, Debug)]
#[command(name = "slicequeue")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "slicequeue.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and media directory
    Init,

    /// Register and list materials
    Material {
        #[command(subcommand)]
        command: MaterialCommand,
    },

    /// Place, inspect and advance orders
    Order {
        #[command(subcommand)]
        command: OrderCommand,
    },

    /// Queue a slice of an already registered geometry file
    Submit {
        /// Full path of the stored geometry file
        file_path: String,
        /// Material id used for pricing
        material_id: i64,
    },

    /// Show the status of a queued job as JSON
    Status {
        /// Handle returned when the job was queued
        handle: String,
    },

    /// Run the worker pool until Ctrl+C
    Work {
        /// Override the configured worker count
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
enum MaterialCommand {
    /// Register a material
    Add {
        name: String,
        /// Price per gram in minor currency units
        cost_per_gram: i64,
    },
    /// List registered materials
    List,
}

#[derive(Subcommand, Debug)]
enum OrderCommand {
    /// Place an order from local model files
    Place {
        #[arg(long)]
        customer: i64,
        #[arg(long)]
        material: String,
        #[arg(long)]
        color: String,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        postal_code: Option<String>,
        #[arg(long)]
        address_line1: Option<String>,
        #[arg(long)]
        address_line2: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// Model files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print an order with its jobs as JSON
    Show { id: i64 },
    /// Queue fresh slices for the order's jobs
    Retry { id: i64 },
    /// Mark a fully estimated order as shipped
    Ship { id: i64 },
    /// Mark a fully estimated order as finished
    Finish { id: i64 },
    /// Delete the order, its records and its files
    Delete { id: i64 },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init(&config.log_level, config.log_format)?;

    let db = Database::open(&config.database_path())?;

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Material { command } => cmd_material(&db, command),
        Commands::Order { command } => cmd_order(&config, db, command),
        Commands::Submit {
            file_path,
            material_id,
        } => {
            let queue = JobQueue::new(db, config.retry.max_attempts);
            println!("{}", queue.submit(&file_path, material_id)?);
            Ok(())
        }
        Commands::Status { handle } => {
            let queue = JobQueue::new(db, config.retry.max_attempts);
            match queue.get_status(&handle)? {
                Some(status) => {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                    Ok(())
                }
                None => bail!("no job with handle {}", handle),
            }
        }
        Commands::Work { workers } => cmd_work(config, db, workers),
    }
}

fn cmd_init(config: &Config) -> Result<()> {
    let media = config.media_directory();
    std::fs::create_dir_all(&media)
        .with_context(|| format!("creating media directory {}", media.display()))?;
    println!("Database ready at {}", config.database_path().display());
    println!("Media directory {}", media.display());
    Ok(())
}

fn cmd_material(db: &Database, command: MaterialCommand) -> Result<()> {
    match command {
        MaterialCommand::Add {
            name,
            cost_per_gram,
        } => {
            if cost_per_gram < 0 {
                bail!("cost per gram must not be negative");
            }
            let id = material_repo::insert(db, &name, cost_per_gram)?;
            println!("Material {} registered as {}", name, id);
        }
        MaterialCommand::List => {
            for material in material_repo::list(db)? {
                println!(
                    "{:>4}  {:<20} {}/g",
                    material.id, material.name, material.cost_per_gram
                );
            }
        }
    }
    Ok(())
}

fn cmd_order(config: &Config, db: Database, command: OrderCommand) -> Result<()> {
    let geometry = GeometryStore::new(db.clone(), config.media_directory());
    let queue = JobQueue::new(db.clone(), config.retry.max_attempts);
    let service = OrderService::new(db, geometry, queue);

    match command {
        OrderCommand::Place {
            customer,
            material,
            color,
            city,
            postal_code,
            address_line1,
            address_line2,
            phone,
            files,
        } => {
            let mut uploads = Vec::with_capacity(files.len());
            for path in &files {
                let content =
                    std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("no usable file name in {}", path.display()))?
                    .to_string();
                uploads.push(Upload { filename, content });
            }

            let placed = service.place_order(NewOrder {
                customer_id: customer,
                material_name: material,
                color,
                shipping: ShippingDetails {
                    city,
                    postal_code,
                    address_line1,
                    address_line2,
                    phone,
                },
                uploads,
            })?;
            println!("{}", serde_json::to_string_pretty(&placed)?);
        }
        OrderCommand::Show { id } => {
            let summary = service.order_summary(id)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OrderCommand::Retry { id } => {
            let handles = service.retry_order(id)?;
            println!("Requeued {} job(s)", handles.len());
            for handle in handles {
                println!("{}", handle);
            }
        }
        OrderCommand::Ship { id } => {
            let order = service.mark_shipped(id)?;
            println!("Order {} is {}", order.id, order.status);
        }
        OrderCommand::Finish { id } => {
            let order = service.mark_finished(id)?;
            println!("Order {} is {}", order.id, order.status);
        }
        OrderCommand::Delete { id } => {
            service.delete_order(id)?;
            println!("Order {} deleted", id);
        }
    }
    Ok(())
}

fn cmd_work(config: Config, db: Database, workers: Option<usize>) -> Result<()> {
    let slicer = CommandSlicer::from_config(&config.slicer)?;
    let pipeline = Pipeline::new(
        db.clone(),
        Arc::new(slicer),
        PricingPolicy::from(&config.pricing),
    );

    let mut settings = PoolSettings::from_config(&config);
    if let Some(workers) = workers {
        settings.worker_count = workers;
    }

    let queue = JobQueue::new(db, config.retry.max_attempts);
    let pool = WorkerPool::new(queue, Arc::new(pipeline), settings)?;

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("installing Ctrl+C handler")?;

    info!("Worker pool running, press Ctrl+C to stop");
    let _ = stop_rx.recv();

    pool.shutdown();
    pool.wait();
    Ok(())
}
