//! # Causeway CLI
//!
//! Command-line utilities for inspecting topic names on the wire.

use anyhow::{Context, Result};
use causeway_proto::{decode_topic_id, encode_topic_id};
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "encode" => {
            if args.len() < 3 {
                eprintln!("Usage: causeway encode <topic>");
                std::process::exit(1);
            }
            let topic = &args[2];
            let encoded = encode_topic_id(topic);
            println!("{encoded}");
        }
        "decode" => {
            if args.len() < 3 {
                eprintln!("Usage: causeway decode <wire-id>");
                std::process::exit(1);
            }
            let wire_id = &args[2];
            let decoded = decode_topic_id(wire_id).context("Failed to decode")?;
            println!("{decoded}");
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"Causeway CLI

USAGE:
    causeway <COMMAND> [OPTIONS]

COMMANDS:
    encode <topic>    Encode a topic name to its wire topic id
    decode <wire-id>  Decode a wire topic id back to the topic name
    help              Show this help message

EXAMPLES:
    causeway encode "orders/created"
    causeway decode "orders%2Fcreated"
"#
    );
}
