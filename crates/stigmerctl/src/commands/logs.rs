//! Logs command: tail and follow the daemon's live log

use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use stigmer_core::StigmerError;
use stigmer_server::logs::{tail_lines, LIVE_LOG};
use stigmer_server::Config;

pub async fn execute(follow: bool, tail: usize) -> anyhow::Result<()> {
    let config = Config::from_env();
    let live = config.logs_dir().join(LIVE_LOG);
    if !live.is_file() {
        return Err(StigmerError::not_found("log file", live.display().to_string()).into());
    }

    for line in tail_lines(&live, tail)? {
        println!("{line}");
    }

    if !follow {
        return Ok(());
    }

    // Poll for appended bytes; rotation truncates, so a shrinking file
    // means start over from the top.
    let mut offset = std::fs::metadata(&live)?.len();
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let len = match std::fs::metadata(&live) {
            Ok(meta) => meta.len(),
            Err(_) => continue,
        };
        if len < offset {
            offset = 0;
        }
        if len == offset {
            continue;
        }
        let mut file = std::fs::File::open(&live)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = String::new();
        file.read_to_string(&mut buffer)?;
        offset = len;
        print!("{buffer}");
    }
}
