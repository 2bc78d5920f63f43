//! Dot-terminated DATA-mode ingestion: RFC 5321 §4.5.2 unstuffing and the
//! message-size cap.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, PartialEq, Eq)]
pub enum DataResult {
    Ok(Vec<u8>),
    TooLarge,
}

/// Reads lines until a lone `.` terminator, dot-unstuffing as it goes and
/// enforcing `max_size` against the accumulated output.
pub async fn read_data<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_size: u64,
) -> std::io::Result<DataResult> {
    let mut out = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break; // EOF: treat as if terminator arrived, matching a dropped connection mid-DATA.
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "." {
            break;
        }
        let content = if let Some(rest) = trimmed.strip_prefix("..") {
            format!(".{}", rest)
        } else {
            trimmed.to_string()
        };
        out.extend_from_slice(content.as_bytes());
        out.extend_from_slice(b"\r\n");
        if out.len() as u64 > max_size {
            // Keep draining until the terminator so the connection stays in sync.
            while reader.read_line(&mut line).await? > 0 {
                if line.trim_end_matches(['\r', '\n']) == "." {
                    break;
                }
                line.clear();
            }
            return Ok(DataResult::TooLarge);
        }
    }
    Ok(DataResult::Ok(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_until_lone_dot() {
        let input = b"Subject: hi\r\n\r\nhello\r\n.\r\n".to_vec();
        let mut reader = BufReader::new(Cursor::new(input));
        let result = read_data(&mut reader, 1_000_000).await.unwrap();
        match result {
            DataResult::Ok(bytes) => assert_eq!(bytes, b"Subject: hi\r\n\r\nhello\r\n"),
            _ => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn unstuffs_leading_dots() {
        let input = b"..this had a leading dot\r\n.\r\n".to_vec();
        let mut reader = BufReader::new(Cursor::new(input));
        let result = read_data(&mut reader, 1_000_000).await.unwrap();
        match result {
            DataResult::Ok(bytes) => assert_eq!(bytes, b".this had a leading dot\r\n"),
            _ => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn oversize_message_is_rejected() {
        let input = b"aaaaaaaaaa\r\n.\r\n".to_vec();
        let mut reader = BufReader::new(Cursor::new(input));
        let result = read_data(&mut reader, 5).await.unwrap();
        assert_eq!(result, DataResult::TooLarge);
    }
}
