//! The thin alarm client (spec.md §6 "Client CLI"): issues `GET /cmd/<Name>`
//! requests against the daemon's localhost front-end, either as a single
//! shot selected by a flag or interactively from a prompt loop.

use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::TcpStream,
    process,
};

use clap::Parser;

/// One entry in the command table: a single-letter shortcut, the event name
/// it issues, and its help text — the Rust analogue of
/// `original_source/src/alarm/command.py`'s `Command` record.
struct Command {
    letter: char,
    event_name: &'static str,
    description: &'static str,
}

/// The fixed command table. Extend here to add a new daemon command.
const COMMANDS: &[Command] = &[
    Command { letter: 'd', event_name: "DayArm", description: "Day arm" },
    Command { letter: 'q', event_name: "Quit", description: "Quit" },
    Command { letter: 'e', event_name: "Leave", description: "lEave" },
    Command { letter: 'i', event_name: "Disarm", description: "dIsarm" },
];

/// Convert a camel-case event name (`DayArm`) to kebab-case (`day-arm`) for
/// use as a long flag.
fn kebab(event_name: &str) -> String {
    let mut out = String::new();
    for (i, c) in event_name.char_indices() {
        if i > 0 && c.is_uppercase() {
            out.push('-');
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

#[derive(Parser)]
#[command(name = "alarmctl", about = "Security alarm CLI")]
struct Args {
    /// Day arm
    #[arg(short = 'd', long = "day-arm")]
    day_arm: bool,

    /// Quit
    #[arg(short = 'q', long = "quit")]
    quit: bool,

    /// lEave
    #[arg(short = 'e', long = "leave")]
    leave: bool,

    /// dIsarm
    #[arg(short = 'i', long = "disarm")]
    disarm: bool,

    /// Host the daemon's request front-end listens on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port the daemon's request front-end listens on.
    #[arg(long, default_value_t = 5000)]
    port: u16,
}

impl Args {
    /// The single flag-selected command, if any were passed. `clap` does not
    /// see these four as mutually exclusive (each is its own named field),
    /// so the first one set wins, matching the Python original's
    /// first-match-in-table-order behavior.
    fn selected(&self) -> Option<&'static Command> {
        let flags = [
            (self.day_arm, 'd'),
            (self.quit, 'q'),
            (self.leave, 'e'),
            (self.disarm, 'i'),
        ];
        flags
            .iter()
            .find(|(set, _)| *set)
            .and_then(|(_, letter)| COMMANDS.iter().find(|c| c.letter == *letter))
    }
}

fn main() {
    let args = Args::parse();

    if let Some(command) = args.selected() {
        match run_command(&args.host, args.port, command) {
            Ok(()) => {}
            Err(e) => {
                eprintln!("Request error: {e}");
                process::exit(1);
            }
        }
    } else {
        shell(&args.host, args.port);
    }
}

/// Issue `GET /cmd/<event_name>` and discard the response body.
fn run_command(host: &str, port: u16, command: &Command) -> io::Result<()> {
    let mut stream = TcpStream::connect((host, port))?;
    write!(stream, "GET /cmd/{} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n", command.event_name)?;
    let mut response = String::new();
    BufReader::new(&stream).read_to_string(&mut response)?;
    Ok(())
}

fn shell_help() {
    println!("Valid commands are:");
    println!("x: eXit this command line interface");
    for command in COMMANDS {
        println!(
            "{}: {} (--{})",
            command.letter,
            command.description,
            kebab(command.event_name)
        );
    }
}

/// The interactive prompt loop: read one line, dispatch its first
/// character, repeat until `x`.
fn shell(host: &str, port: u16) {
    shell_help();
    let stdin = io::stdin();
    loop {
        print!("Enter remote command: ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        let Some(letter) = line.chars().next() else {
            shell_help();
            continue;
        };
        if letter == 'x' {
            return;
        }

        match COMMANDS.iter().find(|c| c.letter == letter) {
            Some(command) => {
                if let Err(e) = run_command(host, port, command) {
                    println!("Request error: {e}");
                }
            }
            None => shell_help(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab_converts_camel_case() {
        assert_eq!(kebab("DayArm"), "day-arm");
        assert_eq!(kebab("Quit"), "quit");
    }
}
