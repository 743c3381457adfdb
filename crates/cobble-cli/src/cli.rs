//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Queue events and drain them every 10 ms on the main task
    #[arg(long, global = true)]
    pub deferred: bool,

    /// Use the in-process loopback adapter with a demo peripheral
    #[arg(long, global = true)]
    pub simulate: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List advertising devices
    Scan {
        /// Only report devices offering this service (repeatable)
        #[arg(short, long = "filter")]
        filter: Vec<String>,
        /// How long to scan
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
    },
    /// Connect to a device and exercise its characteristics
    Connect {
        /// Device identifier as printed by `scan`
        identifier: String,
        /// Service filter used while looking for the device (repeatable)
        #[arg(short, long = "filter")]
        filter: Vec<String>,
        /// Subscribe to this characteristic
        #[arg(long)]
        subscribe: Option<String>,
        /// Read this characteristic once
        #[arg(long)]
        read: Option<String>,
        /// Write to this characteristic (requires --hex)
        #[arg(long, requires = "hex")]
        write: Option<String>,
        /// Bytes to write, hex encoded
        #[arg(long)]
        hex: Option<String>,
        /// How long to stay connected
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan() {
        let cli = Cli::try_parse_from(["cobble", "--deferred", "scan", "-f", "180D", "-f", "FFE0"])
            .unwrap();
        assert!(cli.deferred);
        match cli.command {
            Commands::Scan { filter, seconds } => {
                assert_eq!(filter, vec!["180D", "FFE0"]);
                assert_eq!(seconds, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_write_requires_hex() {
        let result = Cli::try_parse_from(["cobble", "connect", "AA:BB", "--write", "FFE1"]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from([
            "cobble", "connect", "AA:BB", "--write", "FFE1", "--hex", "0102", "--simulate",
        ])
        .unwrap();
        assert!(cli.simulate);
    }
}
