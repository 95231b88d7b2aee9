//! Newline-delimited JSON framing for streamed responses.

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::stream::{self, StreamExt};

/// Split a stream of body chunks into lines, as chunks arrive.
///
/// Line terminators (`\n`, `\r\n`) are stripped and blank lines dropped.
/// A trailing line without terminator is yielded at end of input. The
/// stream ends after the first chunk error.
pub fn split_lines<S, E>(chunks: S) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    stream::unfold(
        (chunks, BytesMut::new(), false),
        |(mut chunks, mut buf, mut done)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line = buf.split_to(pos + 1).freeze();
                    let line = trim_line(line);
                    if line.is_empty() {
                        continue;
                    }
                    return Some((Ok(line), (chunks, buf, done)));
                }

                if done {
                    if buf.is_empty() {
                        return None;
                    }
                    let line = trim_line(buf.split().freeze());
                    if line.is_empty() {
                        return None;
                    }
                    return Some((Ok(line), (chunks, buf, done)));
                }

                match chunks.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        buf.clear();
                        return Some((Err(e), (chunks, buf, true)));
                    }
                    None => done = true,
                }
            }
        },
    )
}

fn trim_line(line: Bytes) -> Bytes {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    line.slice(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<Result<&'static str, &'static str>>) -> Vec<Result<String, String>> {
        let chunks = stream::iter(
            chunks
                .into_iter()
                .map(|c| c.map(|s| Bytes::from_static(s.as_bytes())).map_err(str::to_string)),
        );
        split_lines(chunks)
            .map(|line| line.map(|l| String::from_utf8_lossy(&l).into_owned()))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_lines_across_chunks() {
        let lines = collect(vec![
            Ok("{\"status\":\"Pull"),
            Ok("ing\"}\r\n{\"sta"),
            Ok("tus\":\"Done\"}\n"),
        ])
        .await;

        assert_eq!(
            lines,
            vec![
                Ok("{\"status\":\"Pulling\"}".to_string()),
                Ok("{\"status\":\"Done\"}".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let lines = collect(vec![Ok("a\n\n  \nb")]).await;
        assert_eq!(lines, vec![Ok("a".to_string()), Ok("b".to_string())]);
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let lines = collect(vec![Ok("a\npartial"), Err("reset"), Ok("never\n")]).await;
        assert_eq!(lines, vec![Ok("a".to_string()), Err("reset".to_string())]);
    }
}
