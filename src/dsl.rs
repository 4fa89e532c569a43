//! The DSL reader (§4.4): parses the configuration text into a port
//! registry and a state-machine table.
//!
//! Grounded directly on the original Python reader's line dispatch, but
//! entry actions are parsed straight into the [`crate::actions::Action`]
//! algebra rather than captured as host-language expressions (§9).

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use crate::{
    actions::{Action, Cmp, Level},
    port::{self, Registry},
    state::{State, Table, DONE},
};

/// Errors raised while reading a configuration file.
#[derive(Debug)]
pub enum Error {
    /// The file could not be opened or read.
    Io(std::io::Error),
    /// One or more lines failed to parse; start-up aborts once every line
    /// has been looked at.
    Syntax(Vec<String>),
    /// Two ports share a name or GPIO line.
    DuplicatePort(port::Error),
    /// An action or transition named a state that was never defined.
    UnknownStateReference(String),
    /// The file never declared an initial state with `%i`.
    NoInitialState,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "{e}"),
            Error::Syntax(lines) => {
                for line in lines {
                    writeln!(f, "{line}")?;
                }
                write!(f, "{} syntax error(s)", lines.len())
            }
            Error::DuplicatePort(e) => write!(f, "{e}"),
            Error::UnknownStateReference(name) => write!(f, "reference to unknown state '{name}'"),
            Error::NoInitialState => write!(f, "configuration never declared an initial state (%i)"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Which state subsequent `|` and transition lines apply to.
#[derive(Clone, PartialEq, Eq)]
enum Target {
    None,
    Named(String),
    Wildcard,
}

/// Parse `source` as a configuration file, returning the populated port
/// registry and state table.
///
/// # Errors
///
/// Returns an error for a malformed file: I/O failure, accumulated syntax
/// errors, a duplicate port, a dangling state reference, or a missing
/// initial-state declaration.
pub fn read(source: &Path, sensor_dir: PathBuf, disable_dir: PathBuf) -> Result<(Registry, Table), Error> {
    let text = std::fs::read_to_string(source)?;
    let source_name = source.display().to_string();

    let mut registry = Registry::new(sensor_dir, disable_dir);
    let mut states: HashMap<String, State> = HashMap::new();
    let mut wildcard = State::new("*");
    let mut initial: Option<String> = None;
    let mut current = Target::None;
    let mut in_block = false;
    let mut errors: Vec<String> = Vec::new();

    for (lineno, raw) in text.lines().enumerate() {
        let lineno = lineno + 1;

        if in_block {
            if raw.trim_end() == "%}" {
                in_block = false;
            }
            continue;
        }

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        if raw.starts_with('#') {
            continue;
        }
        if raw.trim_end() == "%{" {
            in_block = true;
            continue;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();

        if tokens.first() == Some(&"SENSOR") || tokens.first() == Some(&"ACTUATOR") {
            match parse_port_line(&tokens) {
                Ok(identity) => {
                    let result = if tokens[0] == "SENSOR" {
                        registry.define_sensor(identity)
                    } else {
                        registry.define_actuator(identity)
                    };
                    if let Err(e) = result {
                        return Err(Error::DuplicatePort(e));
                    }
                }
                Err(()) => errors.push(syntax_error(&source_name, lineno, trimmed)),
            }
            continue;
        }

        if tokens.first() == Some(&"%i") {
            match tokens.get(1) {
                Some(name) => initial = Some((*name).to_string()),
                None => errors.push(syntax_error(&source_name, lineno, trimmed)),
            }
            continue;
        }

        if trimmed == "*:" {
            wildcard_entry(&mut wildcard);
            current = Target::Wildcard;
            continue;
        }

        if let Some(name) = trimmed.strip_suffix(':') {
            if !name.is_empty() && !name.contains(char::is_whitespace) {
                states.entry(name.to_string()).or_insert_with(|| State::new(name));
                current = Target::Named(name.to_string());
                continue;
            }
        }

        if let Some(rest) = trimmed.strip_prefix('|') {
            match (&current, parse_action_line(rest)) {
                (Target::None, _) => errors.push(syntax_error(&source_name, lineno, trimmed)),
                (_, Err(())) => errors.push(syntax_error(&source_name, lineno, trimmed)),
                (Target::Named(name), Ok(action)) => states.get_mut(name).unwrap().push_action(action),
                (Target::Wildcard, Ok(action)) => wildcard.push_action(action),
            }
            continue;
        }

        if trimmed == ";" {
            continue;
        }

        if let Some(idx) = trimmed.find('>') {
            let (left, right) = trimmed.split_at(idx);
            let event_part = left.trim();
            let target = right[1..].trim();
            if target.is_empty() {
                errors.push(syntax_error(&source_name, lineno, trimmed));
                continue;
            }

            let (event, timer_action) = match parse_timer_sugar(event_part) {
                Some((delay, event_name)) => (Some(event_name.clone()), Some(Action::RegisterTimer(delay, event_name))),
                None if event_part.is_empty() => (None, None),
                None => (Some(event_part.to_string()), None),
            };

            match &current {
                Target::None => errors.push(syntax_error(&source_name, lineno, trimmed)),
                Target::Named(name) => {
                    let state = states.get_mut(name).unwrap();
                    if let Some(action) = timer_action {
                        state.push_action(action);
                    }
                    state.set_transition(event, target.to_string());
                }
                Target::Wildcard => {
                    if let Some(action) = timer_action {
                        wildcard.push_action(action);
                    }
                    wildcard.set_transition(event, target.to_string());
                }
            }
            continue;
        }

        errors.push(syntax_error(&source_name, lineno, trimmed));
    }

    if in_block {
        errors.push(format!("{source_name}: unterminated %{{ block"));
    }
    if !errors.is_empty() {
        return Err(Error::Syntax(errors));
    }

    let initial = initial.ok_or(Error::NoInitialState)?;
    validate_references(&states, &wildcard, &initial)?;

    let table = Table::new(states, wildcard, initial);
    table.validate().map_err(|e| match e {
        crate::state::Error::UnknownState(name) => Error::UnknownStateReference(name),
        other => Error::UnknownStateReference(other.to_string()),
    })?;
    Ok((registry, table))
}

fn syntax_error(source: &str, lineno: usize, line: &str) -> String {
    format!("{source}({lineno}): syntax error [{line}]")
}

/// The wildcard header resets nothing today; kept as a hook matching the
/// other branches' shape and the reader's "subsequent declarations apply to
/// the wildcard state" wording.
fn wildcard_entry(_wildcard: &mut State) {}

fn parse_port_line(tokens: &[&str]) -> Result<port::Identity, ()> {
    if tokens.len() != 6 {
        return Err(());
    }
    let pcb = tokens[1].to_string();
    let physical_pin: u32 = tokens[2].parse().map_err(|_| ())?;
    let line: u32 = tokens[3].parse().map_err(|_| ())?;
    let always_log = match tokens[4] {
        "1" => true,
        "0" => false,
        _ => return Err(()),
    };
    let name = tokens[5].to_string();
    Ok(port::Identity {
        name,
        pcb,
        physical_pin,
        line,
        always_log,
    })
}

/// Recognizes `<digits>s` or `<digits>.<digits>s` and returns the delay in
/// seconds plus the rewritten `TIMER_<d>` event name.
fn parse_timer_sugar(token: &str) -> Option<(f64, String)> {
    let digits = token.strip_suffix('s')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let delay: f64 = digits.parse().ok()?;
    Some((delay, format!("TIMER_{digits}")))
}

fn parse_action_line(rest: &str) -> Result<Action, ()> {
    let (guard, body) = match rest.as_bytes().first() {
        Some(b'=' | b'<' | b'>') => {
            let op = rest.as_bytes()[0];
            let digits_end = rest[1..]
                .find(|c: char| !c.is_ascii_digit())
                .map_or(rest.len(), |i| i + 1);
            let n: i64 = rest[1..digits_end].parse().map_err(|_| ())?;
            let cmp = match op {
                b'=' => Cmp::Eq,
                b'<' => Cmp::Lt,
                b'>' => Cmp::Gt,
                _ => unreachable!(),
            };
            (Some((cmp, n)), rest[digits_end..].trim_start())
        }
        _ => (None, rest.trim_start()),
    };

    let action = parse_action_expr(body)?;
    Ok(match guard {
        Some((cmp, n)) => Action::Guard(cmp, n, Box::new(action)),
        None => action,
    })
}

fn parse_action_expr(text: &str) -> Result<Action, ()> {
    let text = text.trim().trim_end_matches(';').trim();

    if let Some(id) = text.strip_prefix("call ") {
        return Ok(Action::Call(id.trim().to_string()));
    }
    if let Some(inner) = text.strip_prefix("ClearCounter(").and_then(|s| s.strip_suffix(')')) {
        return Ok(Action::ClearCounter(unquote(inner.trim())));
    }

    let open = text.find('(').ok_or(())?;
    if !text.ends_with(')') {
        return Err(());
    }
    let fname = &text[..open];
    let arg_text = &text[open + 1..text.len() - 1];
    let args = split_args(arg_text);

    match fname {
        "set_bit" => {
            let [name, value] = two(&args)?;
            Ok(Action::SetBit(unquote(name), parse_bool(value)?))
        }
        "set_sensor_event" => {
            let [name, event] = two(&args)?;
            Ok(Action::SetSensorEvent(unquote(name), parse_optional_string(event)))
        }
        "increment_sensors" => no_args(&args, Action::IncrementSensors),
        "zero_sensors" => no_args(&args, Action::ZeroSensors),
        "syslog" => {
            let [level, message] = two(&args)?;
            Ok(Action::Syslog(parse_level(level)?, unquote(message)))
        }
        "register_timer_event" => {
            let [delay, event] = two(&args)?;
            Ok(Action::RegisterTimer(delay.trim().parse().map_err(|_| ())?, unquote(event)))
        }
        "unlink" => one(&args).map(|p| Action::Unlink(unquote(p))),
        "touch" => one(&args).map(|p| Action::Touch(unquote(p))),
        "vmqueue" => one(&args).map(|c| Action::VmQueue(unquote(c))),
        _ => Err(()),
    }
}

fn split_args(text: &str) -> Vec<&str> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut in_quote: Option<char> = None;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match in_quote {
            Some(q) if c == q => in_quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => in_quote = Some(c),
                '(' => depth += 1,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    args.push(text[start..i].trim());
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    args.push(text[start..].trim());
    args
}

fn one<'a>(args: &[&'a str]) -> Result<&'a str, ()> {
    match args {
        [a] => Ok(a),
        _ => Err(()),
    }
}

fn two<'a>(args: &[&'a str]) -> Result<[&'a str; 2], ()> {
    match args {
        [a, b] => Ok([a, b]),
        _ => Err(()),
    }
}

fn no_args(args: &[&str], action: Action) -> Result<Action, ()> {
    if args.is_empty() {
        Ok(action)
    } else {
        Err(())
    }
}

fn unquote(text: &str) -> String {
    let text = text.trim();
    if text.len() >= 2 {
        let bytes = text.as_bytes();
        if (bytes[0] == b'\'' && bytes[text.len() - 1] == b'\'') || (bytes[0] == b'"' && bytes[text.len() - 1] == b'"') {
            return text[1..text.len() - 1].to_string();
        }
    }
    text.to_string()
}

fn parse_bool(text: &str) -> Result<bool, ()> {
    match text.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(()),
    }
}

fn parse_optional_string(text: &str) -> Option<String> {
    match text.trim() {
        "None" | "none" | "null" => None,
        other => Some(unquote(other)),
    }
}

fn parse_level(text: &str) -> Result<Level, ()> {
    match unquote(text).to_lowercase().as_str() {
        "debug" => Ok(Level::Debug),
        "info" => Ok(Level::Info),
        "warning" => Ok(Level::Warning),
        "critical" | "crit" => Ok(Level::Critical),
        _ => Err(()),
    }
}

/// Walks every entry action and transition target, checking that every
/// `Call`/`ClearCounter` reference and every transition target names a real
/// state (or `DONE`), before any of it is handed to the interpreter.
fn validate_references(states: &HashMap<String, State>, wildcard: &State, initial: &str) -> Result<(), Error> {
    if !states.contains_key(initial) {
        return Err(Error::UnknownStateReference(initial.to_string()));
    }

    let all_states = states.values().chain(std::iter::once(wildcard));
    for state in all_states {
        for action in state.entry_actions() {
            check_action_refs(action, states)?;
        }
        for target in state.transitions().values() {
            if target != DONE && !states.contains_key(target) {
                return Err(Error::UnknownStateReference(target.clone()));
            }
        }
    }
    Ok(())
}

fn check_action_refs(action: &Action, states: &HashMap<String, State>) -> Result<(), Error> {
    match action {
        Action::Call(name) | Action::ClearCounter(name) => {
            if !states.contains_key(name) {
                return Err(Error::UnknownStateReference(name.clone()));
            }
            Ok(())
        }
        Action::Guard(_, _, inner) => check_action_refs(inner, states),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::Write,
        sync::atomic::{AtomicU32, Ordering},
    };

    struct TempConfig(PathBuf);

    impl Drop for TempConfig {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    impl TempConfig {
        fn path(&self) -> &Path {
            &self.0
        }
    }

    fn write_config(text: &str) -> TempConfig {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("alarmd-dsl-test-{}-{n}.alarm", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        TempConfig(path)
    }

    #[test]
    fn reads_sensors_actuators_and_chained_states() {
        let file = write_config(
            "# a comment\n\
             SENSOR  pcb0 1 17 0 Front\n\
             ACTUATOR pcb0 2 5 0 Siren5\n\
             %i initial\n\
             initial:\n\
             | set_bit('Siren5', 1)\n\
             > second\n\
             second:\n\
             | set_bit('Siren5', 0)\n\
             > DONE\n",
        );

        let (registry, table) = read(file.path(), PathBuf::from("/tmp/s"), PathBuf::from("/tmp/d")).unwrap();
        assert!(registry.by_name("Front").is_some());
        assert!(registry.by_name("Siren5").is_some());
        assert_eq!(table.initial, "initial");
    }

    #[test]
    fn guarded_action_and_event_transition_parse() {
        let file = write_config(
            "%i initial\n\
             initial:\n\
             |=1 syslog(info, 'hello')\n\
             quit > DONE\n",
        );
        let (_registry, table) = read(file.path(), PathBuf::from("/tmp/s"), PathBuf::from("/tmp/d")).unwrap();
        let state = table.states().get("initial").unwrap();
        assert_eq!(state.entry_actions().len(), 1);
        assert!(matches!(state.entry_actions()[0], Action::Guard(Cmp::Eq, 1, _)));
        assert_eq!(state.transitions().get(&Some("quit".to_string())), Some(&"DONE".to_string()));
    }

    #[test]
    fn timer_sugar_rewrites_event_and_inserts_action() {
        let file = write_config(
            "%i initial\n\
             initial:\n\
             10s > DONE\n",
        );
        let (_registry, table) = read(file.path(), PathBuf::from("/tmp/s"), PathBuf::from("/tmp/d")).unwrap();
        let state = table.states().get("initial").unwrap();
        assert_eq!(
            state.transitions().get(&Some("TIMER_10".to_string())),
            Some(&"DONE".to_string())
        );
        assert!(matches!(&state.entry_actions()[0], Action::RegisterTimer(delay, event) if (*delay - 10.0).abs() < f64::EPSILON && event == "TIMER_10"));
    }

    #[test]
    fn block_contents_are_discarded() {
        let file = write_config(
            "%{\nthis is ignored entirely\nso is this\n%}\n%i initial\ninitial:\n> DONE\n",
        );
        let (_registry, table) = read(file.path(), PathBuf::from("/tmp/s"), PathBuf::from("/tmp/d")).unwrap();
        assert_eq!(table.initial, "initial");
    }

    #[test]
    fn unknown_call_target_rejected() {
        let file = write_config("%i initial\ninitial:\n| call nosuch\n> DONE\n");
        let err = match read(file.path(), PathBuf::from("/tmp/s"), PathBuf::from("/tmp/d")) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::UnknownStateReference(name) if name == "nosuch"));
    }

    #[test]
    fn garbage_line_reported_as_syntax_error() {
        let file = write_config("%i initial\ninitial:\nthis is not valid\n> DONE\n");
        let err = match read(file.path(), PathBuf::from("/tmp/s"), PathBuf::from("/tmp/d")) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::Syntax(lines) if lines.len() == 1));
    }

    #[test]
    fn wildcard_header_switches_target() {
        let file = write_config("%i initial\ninitial:\n> DONE\n*:\nCmdQuit > DONE\n");
        let (_registry, table) = read(file.path(), PathBuf::from("/tmp/s"), PathBuf::from("/tmp/d")).unwrap();
        assert_eq!(
            table.wildcard().transitions().get(&Some("CmdQuit".to_string())),
            Some(&"DONE".to_string())
        );
    }
}
