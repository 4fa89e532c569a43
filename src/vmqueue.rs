//! Queuing commands for the external voice-message daemon (§9 SUPPLEMENT).
//!
//! Grounded on `original_source/src/alarmd/vmqueue.py`: a `;`-separated
//! command is split into parts, each rewritten into a `vm shell` line in a
//! temp file under the queue directory; the temp file is made executable
//! and atomically renamed to a timestamped name `vmd` polls for.

use std::{
    fs::{self, File},
    io::{self, Write},
    os::unix::fs::PermissionsExt,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use time::OffsetDateTime;

/// Directory the rewritten `vm shell` lines reference scripts under.
const SCRIPT_DIR: &str = "/usr/local/lib/alarm/scripts";

/// Queue `cmd`'s `;`-separated parts in `queue_dir` for `vmd` to execute.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be written, its
/// permissions cannot be set, or it cannot be renamed into place.
pub fn queue(queue_dir: &Path, cmd: &str) -> io::Result<()> {
    static SEQ: AtomicU64 = AtomicU64::new(0);

    let tmp_path = queue_dir.join(format!(
        "tmp.{}.{}",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    write_commands(&tmp_path, cmd)?;

    let mut perms = fs::metadata(&tmp_path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&tmp_path, perms)?;

    let now = OffsetDateTime::now_utc();
    let final_path = queue_dir.join(format!(
        "vm.{:04}.{:02}.{:02}.{:02}.{:02}.{:02}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    ));
    fs::rename(&tmp_path, &final_path)
}

fn write_commands(tmp_path: &Path, cmd: &str) -> io::Result<()> {
    let mut file = File::create(tmp_path)?;
    for part in cmd.split(';') {
        let part = part.trim();
        writeln!(file, "vm shell -v -x 1 -l modem -S /usr/bin/perl {SCRIPT_DIR}/{part} && exit 0")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_a_timestamped_executable_file() {
        let dir = std::env::temp_dir().join(format!("alarmd-vmqueue-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        queue(&dir, "foo.pl; bar.pl").unwrap();

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(entries.len(), 1);
        let queued = &entries[0];
        assert!(queued.file_name().unwrap().to_str().unwrap().starts_with("vm."));

        let contents = fs::read_to_string(queued).unwrap();
        assert!(contents.contains("foo.pl"));
        assert!(contents.contains("bar.pl"));

        let mode = fs::metadata(queued).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn concurrent_calls_use_distinct_tmp_names() {
        // The final `vm.*` name only has second resolution (matching the
        // original's `time.localtime()` format), so two calls within the
        // same second legitimately overwrite each other. The tmp file name
        // is what must stay distinct, so a second writer never clobbers a
        // first writer's still-open file.
        let dir = std::env::temp_dir().join(format!("alarmd-vmqueue-test2-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        queue(&dir, "one.pl").unwrap();
        queue(&dir, "two.pl").unwrap();

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(entries.len(), 1);

        fs::remove_dir_all(&dir).ok();
    }
}
