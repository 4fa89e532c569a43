//! The request front-end (§4.6): a hand-rolled HTTP/1.1 GET server bound to
//! loopback, translating `/cmd`, `/state`, and `/sensor` requests into reads
//! of or enqueues onto the shared interpreter state.

use std::{
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use crate::{
    port::{Kind, Registry},
    queue::EventQueue,
    state::{CurrentState, Table},
    syslog::Syslog,
};

/// How long an `accept` poll blocks before re-checking the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Bind `addr` and serve requests until `shutdown` is set. Each connection
/// is handled on the accepting thread; requests are cheap lookups or a
/// single enqueue, so no worker pool is needed.
///
/// The listener is polled non-blocking so the accept loop can notice
/// `shutdown` being set by the main thread once the interpreter reaches
/// `DONE`, instead of blocking forever in `accept`.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub fn run(addr: &str, table: &Table, registry: &Registry, queue: &EventQueue, current: &CurrentState, sys: &dyn Syslog, shutdown: &AtomicBool) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => handle_client(stream, table, registry, queue, current, sys),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => std::thread::sleep(POLL_INTERVAL),
            Err(_) => {}
        }
    }
    Ok(())
}

fn handle_client(mut stream: TcpStream, table: &Table, registry: &Registry, queue: &EventQueue, current: &CurrentState, sys: &dyn Syslog) {
    let loopback = stream.peer_addr().is_ok_and(|a| a.ip().is_loopback());
    if !loopback {
        respond(&mut stream, 403, "Forbidden", "");
        return;
    }

    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
        return;
    }

    let Some(path) = parse_get_path(&request_line) else {
        respond(&mut stream, 400, "Bad Request", "");
        return;
    };

    if let Some(name) = path.strip_prefix("/cmd/") {
        handle_cmd(&mut stream, table, queue, sys, name);
    } else if path == "/state" {
        let body = format!("{{\"state\": \"{}\"}}", current.get());
        respond(&mut stream, 200, "OK", &body);
    } else if let Some(name) = path.strip_prefix("/sensor/") {
        handle_sensor(&mut stream, registry, name);
    } else {
        respond(&mut stream, 404, "Not Found", "");
    }
}

fn handle_cmd(stream: &mut TcpStream, table: &Table, queue: &EventQueue, sys: &dyn Syslog, name: &str) {
    let event = format!("Cmd{name}");
    if table.wildcard().transitions().contains_key(&Some(event.clone())) {
        queue.push(event.clone());
        sys.info(&format!("command: {event}"));
        let body = format!("{{\"{event}\": \"OK\"}}");
        respond(stream, 200, "OK", &body);
    } else {
        respond(stream, 404, "Not Found", "");
    }
}

fn handle_sensor(stream: &mut TcpStream, registry: &Registry, name: &str) {
    match registry.by_name(name) {
        Some((Kind::Sensor, _)) => {
            let value = i32::from(registry.read_level(name).unwrap_or(false));
            respond(stream, 200, "OK", &format!("{{\"value\": {value}}}"));
        }
        _ => respond(stream, 404, "Not Found", ""),
    }
}

fn parse_get_path(request_line: &str) -> Option<&str> {
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    parts.next()
}

fn respond(stream: &mut TcpStream, status: u16, reason: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
}
