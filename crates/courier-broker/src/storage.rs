//! Partition log reading.
//!
//! Logs are one message-JSON per line, UTF-8, newline-terminated, appended
//! without fsync. There is no replay path at steady state; this reader exists
//! for tests and out-of-band inspection. Malformed lines are skipped, not
//! fatal: a crash mid-append can leave a torn last line.

use courier_common::{Message, Result};
use std::path::Path;
use tokio::io::AsyncBufReadExt;
use tracing::warn;

/// Read every well-formed message from a partition log.
pub async fn read_log(path: impl AsRef<Path>) -> Result<Vec<Message>> {
    let path = path.as_ref();
    let file = tokio::fs::File::open(path).await?;
    let reader = tokio::io::BufReader::new(file);
    let mut lines = reader.lines();

    let mut messages = Vec::new();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(&line) {
            Ok(message) => messages.push(message),
            Err(e) => {
                warn!(path = %path.display(), line = line_no, "skipping bad log line: {}", e);
            }
        }
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_log_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partition-0.log");

        let good_a = Message::new("events", 0, "a");
        let good_b = Message::new("events", 0, "b");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", serde_json::to_string(&good_a).unwrap()).unwrap();
        writeln!(file, "not json at all").unwrap();
        writeln!(file, "{}", serde_json::to_string(&good_b).unwrap()).unwrap();
        write!(file, "{{\"id\": \"torn").unwrap();

        let messages = read_log(&path).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], good_a);
        assert_eq!(messages[1], good_b);
    }

    #[tokio::test]
    async fn test_read_log_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        assert!(read_log(dir.path().join("absent.log")).await.is_err());
    }
}
