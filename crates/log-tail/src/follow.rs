// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Sleeps `poll`, returning `false` if `cancel` fired instead.
async fn pause(poll: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(poll) => true,
    }
}

/// Waits for `path` to appear, then hands every complete line appended to it
/// to `on_line` (without the line terminator) until `cancel` fires.
///
/// Returns the number of lines delivered.
pub async fn follow_file<F>(
    path: &Path,
    poll: Duration,
    cancel: &CancellationToken,
    mut on_line: F,
) -> io::Result<usize>
where
    F: FnMut(String),
{
    loop {
        if cancel.is_cancelled() {
            return Ok(0);
        }
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if !pause(poll, cancel).await {
            return Ok(0);
        }
    }

    debug!("Following {}", path.display());
    let mut reader = BufReader::new(File::open(path).await?);
    let mut pending = Vec::new();
    let mut delivered = 0;

    while !cancel.is_cancelled() {
        let read = reader.read_until(b'\n', &mut pending).await?;
        if read > 0 && pending.ends_with(b"\n") {
            // invalid UTF-8 is replaced rather than ending the follow
            let line = String::from_utf8_lossy(&pending)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            pending.clear();
            on_line(line);
            delivered += 1;
            continue;
        }
        // EOF, possibly in the middle of a line that is still being written
        if !pause(poll, cancel).await {
            break;
        }
    }

    debug!("Stopped following {} after {delivered} line(s)", path.display());
    Ok(delivered)
}
