//! Background task piping a worker's raw stdout through `smart_tee` into its
//! official output stream file (`spec.md` §4.2.1 step 7, §4.2.2).

use crate::eventlog::{self, smart_tee};
use crate::mux::MuxAdapter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Polls `raw_path` for newly appended bytes, smart-tees each complete line,
/// and appends the result to `output_path`. Runs until the mux session is no
/// longer alive, taking one final pass afterward to catch trailing output
/// written right before the process exited.
pub async fn run_output_tee(
    mux: Arc<dyn MuxAdapter>,
    session: String,
    raw_path: PathBuf,
    output_path: PathBuf,
    line_cap: usize,
    field_cap: usize,
) {
    let mut offset: u64 = 0;
    let mut pending = String::new();

    loop {
        let alive = mux.session_alive(&session).await.unwrap_or(false);
        offset = drain_new_lines(&raw_path, &output_path, offset, &mut pending, line_cap, field_cap).await;
        if !alive {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn drain_new_lines(
    raw_path: &PathBuf,
    output_path: &PathBuf,
    offset: u64,
    pending: &mut String,
    line_cap: usize,
    field_cap: usize,
) -> u64 {
    let Ok(mut file) = tokio::fs::File::open(raw_path).await else {
        return offset;
    };
    if file.seek(std::io::SeekFrom::Start(offset)).await.is_err() {
        return offset;
    }
    let mut buf = Vec::new();
    let Ok(read) = file.read_to_end(&mut buf).await else {
        return offset;
    };
    if read == 0 {
        return offset;
    }
    pending.push_str(&String::from_utf8_lossy(&buf));

    while let Some(idx) = pending.find('\n') {
        let line: String = pending.drain(..=idx).collect();
        let line = line.trim_end_matches('\n');
        if !line.is_empty() {
            let teed = smart_tee(line, line_cap, field_cap);
            let _ = eventlog::append_raw_line(output_path, &format!("{teed}\n")).await;
        }
    }

    offset + read as u64
}
