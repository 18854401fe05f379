//! chaintable CLI — inspect pipeline defaults and versions.
//!
//! Usage:
//! ```bash
//! chaintable info
//! chaintable version
//! ```

use std::env;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "info" => cmd_info(),
        "version" | "--version" | "-V" => {
            println!("chaintable {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("chaintable {}", env!("CARGO_PKG_VERSION"));
    println!("Checkpointed chain-to-table-store projection engine\n");
    println!("USAGE:");
    println!("    chaintable <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info     Show chaintable configuration defaults");
    println!("    version  Print version");
    println!("    help     Print this help");
}

fn cmd_info() {
    println!("chaintable v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default batch size: 100 blocks");
    println!("  Default checkpoint interval: every 100 blocks");
    println!("  Default scheduler limits: 30 ready / 100 queued");
    println!("  Projection streams: blocks, transactions, balances, wallets");
    println!("  Storage backends: memory, SQLite");
}
