// ABOUTME: Async live-tail of the annotated whole log for progressive rendering.
// ABOUTME: Polls on a tokio timer, reading on the blocking pool, until the writer session closes.

use std::path::PathBuf;
use std::time::Duration;

use futures::stream::{self, Stream};
use steplog_core::AnnotatedChunk;

use crate::manager::StorageManager;

/// Follow the log at `log` from byte `start`.
///
/// Yields every non-empty chunk as it becomes readable. The stream ends with a
/// chunk marked `complete` once the writer session is gone and all bytes have
/// been delivered, or with a chunk carrying an error if the log cannot be read.
pub fn follow(
    manager: StorageManager,
    log: PathBuf,
    start: u64,
    interval: Duration,
) -> impl Stream<Item = AnnotatedChunk> + Send + 'static {
    stream::unfold(Some(start), move |cursor| {
        let manager = manager.clone();
        let log = log.clone();
        async move {
            let Some(mut pos) = cursor else {
                return None;
            };
            loop {
                // Sample liveness before reading so the last poll sees every byte.
                let live = manager.is_live(&log);
                let poll_manager = manager.clone();
                let path = log.clone();
                // Building the reader flushes what the live session has buffered.
                let read = move || poll_manager.whole_log(&path).chunk(pos, !live);
                let chunk = match tokio::task::spawn_blocking(read).await {
                    Ok(chunk) => chunk,
                    Err(e) => AnnotatedChunk::failed(pos, e.to_string()),
                };

                if chunk.error.is_some() || chunk.complete {
                    return Some((chunk, None));
                }
                if !chunk.is_empty() {
                    pos = chunk.next_offset;
                    return Some((chunk, Some(pos)));
                }

                tokio::time::sleep(interval).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use futures::StreamExt;
    use steplog_core::{StepId, render_all};
    use tempfile::TempDir;

    #[tokio::test]
    async fn follow_delivers_growth_then_completes() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("log");
        let mgr = StorageManager::new(StoreConfig::default());

        let overall = mgr.overall_writer(&log).unwrap();
        let step = mgr.step_writer(&log, StepId::new("s1").unwrap()).unwrap();
        step.write_bytes(b"one\n").unwrap();

        let mut chunks = Box::pin(follow(mgr.clone(), log.clone(), 0, Duration::from_millis(5)));

        let first = chunks.next().await.unwrap();
        assert!(!first.complete);
        assert_eq!(
            String::from_utf8(first.render()).unwrap(),
            "<span class=\"step-node-s1\">one\n</span>"
        );

        step.write_bytes(b"two\n").unwrap();
        overall.write_bytes(b"done\n").unwrap();
        overall.close().unwrap();

        let mut rest = Vec::new();
        while let Some(chunk) = chunks.next().await {
            rest.push(chunk);
        }

        let last = rest.last().unwrap();
        assert!(last.complete);
        assert_eq!(last.next_offset, 13);

        let tokens: Vec<_> = rest.iter().flat_map(|c| c.tokens.clone()).collect();
        assert_eq!(
            String::from_utf8(render_all(&tokens)).unwrap(),
            "<span class=\"step-node-s1\">two\n</span>done\n"
        );
    }

    #[tokio::test]
    async fn follow_sees_slow_output_before_the_buffer_fills() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("log");
        let mgr = StorageManager::new(StoreConfig::default());

        let overall = mgr.overall_writer(&log).unwrap();
        overall.write_bytes(b"starting build\n").unwrap();

        let mut chunks = Box::pin(follow(mgr.clone(), log.clone(), 0, Duration::from_millis(5)));
        let first = tokio::time::timeout(Duration::from_millis(500), chunks.next())
            .await
            .expect("first chunk should arrive while the build is running")
            .unwrap();

        assert!(!first.complete);
        assert_eq!(first.render(), b"starting build\n".to_vec());
        overall.close().unwrap();
    }

    #[tokio::test]
    async fn follow_of_finished_log_yields_one_complete_chunk() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("log");
        std::fs::write(&log, b"old output\n").unwrap();
        let mgr = StorageManager::new(StoreConfig::default());

        let chunks: Vec<_> = follow(mgr, log, 0, Duration::from_millis(5))
            .collect()
            .await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].complete);
        assert_eq!(chunks[0].render(), b"old output\n".to_vec());
    }
}
