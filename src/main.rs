//! Device HAL CLI Entry Point
//!
//! Small command line interface for driver discovery and example connect
//! options.
//!
//! For a complete HAL session, see `demos/hal_demo.rs`:
//! ```bash
//! cargo run --example hal_demo
//! ```

use clap::{Parser, Subcommand};

use devhal::core::metadata::driver_catalog;
use devhal::transport::list_ports;

/// Device HAL - uniform driver access over serial, USB and remote transports
#[derive(Parser, Debug)]
#[command(name = "devhal", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List built-in drivers
    ListDrivers,

    /// Print example connect options for a driver
    Example {
        /// Driver to print example options for
        #[arg(default_value = "modbus_rtu")]
        driver: String,
    },

    /// List serial ports visible to the native transport
    Ports,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::ListDrivers => {
            list_drivers();
        }
        Commands::Example { driver } => {
            print_example(&driver);
        }
        Commands::Ports => {
            list_serial_ports();
        }
    }
}

fn list_drivers() {
    let catalog = driver_catalog();

    println!("Built-in drivers:");
    println!();

    for driver in catalog.drivers() {
        println!("  {} ({})", driver.name, driver.display_name);
        println!("    {}", driver.description);
        if !driver.parameters.is_empty() {
            println!("    Options:");
            for parameter in &driver.parameters {
                let req = if parameter.required { " (required)" } else { "" };
                println!("      - {}: {}{}", parameter.name, parameter.description, req);
            }
        }
        println!();
    }

    println!("For a complete HAL session demo, run:");
    println!("  cargo run --example hal_demo");
}

fn print_example(driver: &str) {
    let catalog = driver_catalog();

    match catalog.get(driver) {
        Some(metadata) => match serde_json::to_string_pretty(&metadata.example_options) {
            Ok(example) => println!("{example}"),
            Err(err) => eprintln!("Failed to render example options: {err}"),
        },
        None => {
            eprintln!("Unknown driver: {}", driver);
            let names: Vec<&str> = catalog.drivers().iter().map(|d| d.name).collect();
            eprintln!("Available: {}", names.join(", "));
        }
    }
}

fn list_serial_ports() {
    match list_ports() {
        Ok(ports) if ports.is_empty() => println!("No serial ports found."),
        Ok(ports) => {
            println!("Serial ports:");
            for port in ports {
                println!("  {port}");
            }
        }
        Err(err) => eprintln!("Failed to enumerate serial ports: {err}"),
    }
}
