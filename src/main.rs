mod cm_sketch;
mod config;
mod engine;
mod error;
mod hash;
mod packet_info;
mod pcap_processor;
mod rolling_sketch;
mod sketch_row;
mod vol_counter;

use std::env;
use std::process;

use tracing_subscriber::EnvFilter;

use config::{read_config, EngineConfig};
use engine::FilterEngine;
use pcap_processor::process_pcap;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <pcap_file> [config_file]", args[0]);
        process::exit(1);
    }

    let config = if args.len() > 2 {
        match read_config(&args[2]) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Invalid configuration: {e}");
                process::exit(1);
            }
        }
    } else {
        EngineConfig::default()
    };

    let mut engine = match FilterEngine::new(&config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Cannot build engine: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = process_pcap(&args[1], &mut engine) {
        eprintln!("Capture failed: {e}");
        process::exit(1);
    }
}
