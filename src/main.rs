//! tronctl - Tron address and event feed CLI tool
//!
//! Converts addresses between base58 and hex and fetches pages from the
//! TronGrid contract-events endpoint.

use gridwatch::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
