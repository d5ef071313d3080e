//! Interactive loop: one command per line, replies printed verbatim.

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::client::CubeClient;

pub fn run_repl(client: &CubeClient) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    println!(
        "cube-cli v{}, talking to {} as \"{}\"",
        env!("CARGO_PKG_VERSION"),
        client.addr,
        client.client_name
    );
    println!("Type \\? for help, \\q to quit.");

    let prompt = format!("cube ({}@{})> ", client.client_name, client.addr);
    loop {
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        match line {
            "\\q" | "\\quit" => break,
            "\\?" | "\\help" => {
                print_help();
                continue;
            }
            _ => {}
        }

        match client.send(line) {
            Ok(reply) => println!("{}", reply.body),
            Err(e) => eprintln!("cube-cli: {:#}", e),
        }
    }
    Ok(())
}

fn print_help() {
    println!("Commands are sent to the server as-is:");
    println!("  GET <key>              read a key (NIL when absent)");
    println!("  SET <key> <value>      write a key, replies \"<old> <new>\"");
    println!("  BEGIN                  open a transaction for this client");
    println!("  COMMIT                 validate and apply the transaction");
    println!("  ROLLBACK               discard the transaction");
    println!("Values: \"quoted string\", integer, TRUE/FALSE.");
    println!("Meta:   \\? help, \\q quit.");
}
