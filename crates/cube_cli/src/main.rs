mod args;
mod client;
mod repl;

use std::process;

use anyhow::Result;
use clap::Parser;

use args::Args;
use client::CubeClient;
use repl::run_repl;

fn main() {
    if let Err(e) = run() {
        eprintln!("cube-cli: error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let client = CubeClient::new(args.addr(), args.client.clone());

    // One-shot mode: send, print, exit non-zero on an ERR reply.
    if let Some(ref command) = args.command {
        let reply = client.send(command)?;
        println!("{}", reply.body);
        if !reply.is_ok() {
            process::exit(2);
        }
        return Ok(());
    }

    run_repl(&client)
}
