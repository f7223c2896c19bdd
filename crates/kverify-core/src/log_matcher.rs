//! Ordered phrase matching over application logs.
//!
//! Two realizations share one cursor type:
//! - [`match_ordered`] re-reads a growing snapshot from a [`LogSource`] and
//!   rescans it from the start on every poll (text can be inserted ahead of
//!   content already seen, e.g. when a container restarts).
//! - [`match_ordered_stream`] consumes a live stream of appended lines.
//!
//! In both cases the reported cursor never moves backwards.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::await_engine::{await_condition, AwaitError, Condition, PollSchedule};
use crate::cluster::{ClusterClient, ResourceKind};
use crate::error::{ClusterError, VerifyError};
use crate::predicate::Predicate;

/// Cursor over an ordered phrase list.
///
/// A line advances the cursor once for every pending phrase it contains,
/// each searched after the end of the previous match in that line.
#[derive(Debug, Clone)]
pub struct OrderedCursor<'a> {
    phrases: &'a [String],
    position: usize,
}

impl<'a> OrderedCursor<'a> {
    pub fn new(phrases: &'a [String]) -> Self {
        Self {
            phrases,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_complete(&self) -> bool {
        self.position >= self.phrases.len()
    }

    pub fn feed_line(&mut self, line: &str) {
        let mut offset = 0;
        while let Some(phrase) = self.phrases.get(self.position) {
            match line[offset..].find(phrase.as_str()) {
                Some(at) => {
                    offset += at + phrase.len();
                    self.position += 1;
                }
                None => break,
            }
        }
    }

    pub fn feed_text(&mut self, text: &str) {
        for line in text.lines() {
            if self.is_complete() {
                break;
            }
            self.feed_line(line);
        }
    }
}

/// Expected phrases, in order, and the deadline to see them all by.
#[derive(Debug, Clone)]
pub struct LogAssertion {
    pub phrases: Vec<String>,
    pub schedule: PollSchedule,
}

impl LogAssertion {
    /// Rescans once per second, or twice within deadlines under two seconds.
    pub fn new<S: Into<String>>(
        phrases: impl IntoIterator<Item = S>,
        deadline: Duration,
    ) -> crate::Result<Self> {
        let poll = if deadline > Duration::from_secs(2) {
            Duration::from_secs(1)
        } else {
            deadline / 2
        };
        Ok(Self {
            phrases: phrases.into_iter().map(Into::into).collect(),
            schedule: PollSchedule::new(deadline, poll)?,
        })
    }

    pub fn with_schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.schedule.timeout()
    }
}

/// All phrases were found.
#[derive(Debug, Clone)]
pub struct LogMatch {
    pub elapsed: Duration,
    pub attempts: u32,
    pub captured: String,
}

/// A repeatable read of accumulated log text.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Human-readable origin, used in failure messages.
    fn describe(&self) -> String;

    async fn read(&self) -> Result<String, ClusterError>;
}

/// Log text that is already complete, such as captured build-tool output.
#[derive(Debug, Clone)]
pub struct CapturedLog {
    origin: String,
    text: String,
}

impl CapturedLog {
    pub fn new(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            text: text.into(),
        }
    }
}

#[async_trait]
impl LogSource for CapturedLog {
    fn describe(&self) -> String {
        self.origin.clone()
    }

    async fn read(&self) -> Result<String, ClusterError> {
        Ok(self.text.clone())
    }
}

/// Logs of one pod, read through the cluster client on every poll.
pub struct PodLog {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    pod: String,
}

impl PodLog {
    pub fn new(client: Arc<dyn ClusterClient>, namespace: &str, pod: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            pod: pod.to_string(),
        }
    }
}

#[async_trait]
impl LogSource for PodLog {
    fn describe(&self) -> String {
        format!("{} {}/{} log", ResourceKind::Pod, self.namespace, self.pod)
    }

    async fn read(&self) -> Result<String, ClusterError> {
        self.client.pod_logs(&self.namespace, &self.pod).await
    }
}

#[derive(Debug, Clone)]
struct Progress {
    matched: usize,
    text: String,
}

/// Wait until every phrase of `assertion` appears in order in `source`.
pub async fn match_ordered(
    source: &dyn LogSource,
    assertion: &LogAssertion,
) -> crate::Result<LogMatch> {
    let total = assertion.phrases.len();
    let best = AtomicUsize::new(0);
    let best = &best;
    let phrases = assertion.phrases.as_slice();

    let fetch = move || async move {
        let text = source.read().await?;
        let mut cursor = OrderedCursor::new(phrases);
        cursor.feed_text(&text);
        let previous = best.fetch_max(cursor.position(), Ordering::SeqCst);
        Ok::<_, ClusterError>(Progress {
            matched: previous.max(cursor.position()),
            text,
        })
    };
    let condition = Condition::new(
        Predicate::new(
            format!("{total} ordered log phrase(s)"),
            move |p: &Progress| p.matched >= total,
        ),
        assertion.schedule,
    );

    match await_condition(fetch, &condition).await {
        Ok(done) => Ok(LogMatch {
            elapsed: done.elapsed,
            attempts: done.attempts,
            captured: done.value.text,
        }),
        Err(AwaitError::Timeout { last, elapsed, .. }) => Err(VerifyError::LogTimeout {
            matched: best.load(Ordering::SeqCst),
            expected: assertion.phrases.clone(),
            elapsed,
            captured: last.as_option().map(|p| p.text.clone()).unwrap_or_default(),
        }),
        Err(AwaitError::Fatal {
            reason, elapsed, ..
        }) => Err(VerifyError::AwaitFatal {
            what: source.describe(),
            elapsed,
            reason,
        }),
    }
}

/// Consume appended lines until every phrase has been seen in order.
///
/// A stream that closes before completion fails immediately: no further
/// content can arrive.
pub async fn match_ordered_stream(
    lines: &mut mpsc::Receiver<String>,
    phrases: &[String],
    deadline: Duration,
) -> crate::Result<LogMatch> {
    let start = Instant::now();
    let mut cursor = OrderedCursor::new(phrases);
    let mut captured = String::new();
    let mut received = 0u32;

    while !cursor.is_complete() {
        match tokio::time::timeout_at(start + deadline, lines.recv()).await {
            Ok(Some(line)) => {
                received += 1;
                cursor.feed_line(&line);
                captured.push_str(&line);
                captured.push('\n');
            }
            Ok(None) => {
                debug!(matched = cursor.position(), "log stream closed early");
                return Err(stream_timeout(&cursor, phrases, start, captured));
            }
            Err(_) => return Err(stream_timeout(&cursor, phrases, start, captured)),
        }
    }

    Ok(LogMatch {
        elapsed: start.elapsed(),
        attempts: received,
        captured,
    })
}

fn stream_timeout(
    cursor: &OrderedCursor<'_>,
    phrases: &[String],
    start: Instant,
    captured: String,
) -> VerifyError {
    VerifyError::LogTimeout {
        matched: cursor.position(),
        expected: phrases.to_vec(),
        elapsed: start.elapsed(),
        captured,
    }
}

/// Fail if any forbidden phrase occurs in `text`.
pub fn assert_absent(text: &str, forbidden: &[String]) -> crate::Result<()> {
    match forbidden.iter().find(|p| text.contains(p.as_str())) {
        Some(phrase) => Err(VerifyError::ForbiddenLogPhrase {
            phrase: phrase.clone(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phrases(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cursor_ignores_unrelated_and_repeated_lines() {
        let expected = phrases(&["alpha", "beta"]);
        let mut cursor = OrderedCursor::new(&expected);
        cursor.feed_line("noise");
        cursor.feed_line("alpha");
        cursor.feed_line("alpha again");
        assert_eq!(cursor.position(), 1);
        cursor.feed_line("beta");
        assert!(cursor.is_complete());
    }

    #[test]
    fn test_cursor_requires_order() {
        let expected = phrases(&["alpha", "beta"]);
        let mut cursor = OrderedCursor::new(&expected);
        cursor.feed_text("beta\nalpha\n");
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_cursor_matches_several_phrases_in_one_line() {
        let expected = phrases(&["Started ZeroConfigApplication in", "seconds"]);
        let mut cursor = OrderedCursor::new(&expected);
        cursor.feed_line("Started ZeroConfigApplication in 2.9 seconds (JVM running for 3.4)");
        assert!(cursor.is_complete());

        let expected = phrases(&["seconds", "Started"]);
        let mut cursor = OrderedCursor::new(&expected);
        cursor.feed_line("Started in 2.9 seconds");
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_cursor_is_case_sensitive() {
        let expected = phrases(&["Started"]);
        let mut cursor = OrderedCursor::new(&expected);
        cursor.feed_line("started");
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_log_assertion_rejects_zero_deadline() {
        assert!(LogAssertion::new(["a"], Duration::ZERO).is_err());
        let a = LogAssertion::new(["a"], Duration::from_secs(40)).unwrap();
        assert_eq!(a.schedule.poll_interval(), Duration::from_secs(1));
        assert_eq!(a.deadline(), Duration::from_secs(40));
    }

    #[tokio::test]
    async fn test_match_ordered_on_captured_output() {
        let log = CapturedLog::new(
            "build output",
            "[INFO] k8s: Tomcat started on port(s): 8080 (http)\n\
             [INFO] k8s: Started ZeroConfigApplication in 3.1 seconds\n",
        );
        let assertion = LogAssertion::new(
            [
                "Tomcat started on port(s): 8080",
                "Started ZeroConfigApplication in",
                "seconds",
            ],
            Duration::from_secs(5),
        )
        .unwrap();

        let got = match_ordered(&log, &assertion).await.unwrap();
        assert_eq!(got.attempts, 1);
    }

    #[tokio::test]
    async fn test_match_ordered_empty_phrase_list_succeeds() {
        let log = CapturedLog::new("empty", "");
        let assertion = LogAssertion::new(Vec::<String>::new(), Duration::from_secs(5)).unwrap();
        assert!(match_ordered(&log, &assertion).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_matches_appended_lines() {
        let (tx, mut rx) = mpsc::channel(8);
        let expected = phrases(&["one", "two"]);
        tokio::spawn(async move {
            for line in ["one", "noise", "two"] {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let _ = tx.send(line.to_string()).await;
            }
        });

        let got = match_ordered_stream(&mut rx, &expected, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(got.attempts, 3);
        assert_eq!(got.elapsed, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_stream_closed_early_reports_progress() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send("one".to_string()).await.unwrap();
        drop(tx);
        let expected = phrases(&["one", "two"]);

        let err = match_ordered_stream(&mut rx, &expected, Duration::from_secs(10))
            .await
            .unwrap_err();
        match err {
            VerifyError::LogTimeout {
                matched, captured, ..
            } => {
                assert_eq!(matched, 1);
                assert_eq!(captured, "one\n");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_assert_absent() {
        let forbidden = phrases(&["Running wildfly/wildfly-centos7 image"]);
        assert!(assert_absent("JBoss Bootstrap Environment", &forbidden).is_ok());
        let err = assert_absent("Running wildfly/wildfly-centos7 image, version", &forbidden);
        assert!(matches!(err, Err(VerifyError::ForbiddenLogPhrase { .. })));
    }
}
