use clap::Parser;
use log::{info, LevelFilter};
use server::config::GatewayConfig;
use server::network;
use server::profiling::{self, CpuSampler};
use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// HTTP service address
    #[clap(long, default_value = "0.0.0.0:8080")]
    addr: String,
    /// Sample CPU and memory usage while running
    #[clap(long)]
    cpuprofile: bool,
    /// Write a dhat heap profile on exit (needs the `dhat-heap` feature)
    #[clap(long)]
    memprofile: bool,
    /// Disable all log output
    #[clap(long)]
    disablelog: bool,
    /// Directory with the client build to serve
    #[clap(long, value_name = "DIR")]
    prod: Option<PathBuf>,
    /// Milliseconds to wait for the hub to confirm a registration
    #[clap(long, default_value = "5000")]
    register_timeout_ms: u64,
    /// Never release an identity once admitted
    #[clap(long)]
    retain_identities: bool,
    /// Game ticks per second
    #[clap(short, long, default_value = "30")]
    tick_rate: u32,
}

impl From<&Args> for GatewayConfig {
    fn from(args: &Args) -> Self {
        GatewayConfig {
            addr: args.addr.clone(),
            static_dir: args.prod.clone(),
            register_timeout: Duration::from_millis(args.register_timeout_ms),
            retain_identities: args.retain_identities,
            tick_rate: args.tick_rate,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.disablelog {
        logger.filter_level(LevelFilter::Off);
    }
    logger.init();

    let _heap_profiler = if args.memprofile {
        Some(profiling::start_heap_profiler()?)
    } else {
        None
    };
    let cpu_sampler = args.cpuprofile.then(CpuSampler::start);

    if args.retain_identities {
        info!("Identities are never released; each address can connect once");
    }

    let result = network::run(GatewayConfig::from(&args)).await;

    if let Some(sampler) = cpu_sampler {
        sampler.finish().await;
    }

    result
}
