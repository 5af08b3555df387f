//! Timeline annotations and visualization output.
//!
//! An [`Annotations`] sink is created per test and shares the clock of the
//! test's [`OpLog`], so annotations line up with recorded operations. When
//! the configured [`VisMode`] asks for it, the sink writes a JSON timeline
//! holding the history and every annotation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use kvlock_core::{ClientId, History, KvInput, KvOutput, OpLog, OperationId, RunId, Timestamp};

use crate::config::{VisConfig, VisMode};
use crate::error::Result;

/// Tag of linearizability checker annotations.
pub const TAG_CHECKER: &str = "$ Checker";

/// Tag of fault annotations.
pub const TAG_FAILURE: &str = "$ Failure";

/// Tag of test progress annotations.
pub const TAG_INFO: &str = "$ Test Info";

/// Background colors.
pub mod colors {
    pub const INFO: &str = "#FAFAFA";
    pub const NEUTRAL: &str = "#FFECB3";
    pub const SUCCESS: &str = "#C8E6C9";
    pub const FAILURE: &str = "#FFCDD2";
    pub const FAULT: &str = "#B3E5FC";
}

/// Length of the closing info interval, in nanoseconds.
const CLOSING_INTERVAL: Timestamp = 1000;

/// A labelled span on the timeline. Points have `start == end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub tag: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub description: String,
    pub details: String,
    pub background_color: String,
}

#[derive(Debug, Clone)]
struct Continuous {
    start: Timestamp,
    description: String,
    details: String,
    background_color: String,
}

impl Continuous {
    fn close(self, tag: String, end: Timestamp) -> Annotation {
        Annotation {
            tag,
            start: self.start,
            end,
            description: self.description,
            details: self.details,
            background_color: self.background_color,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    annotations: Vec<Annotation>,
    continuous: HashMap<String, Continuous>,
    finalized: bool,
}

/// An operation as it appears on the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineOperation {
    pub id: OperationId,
    pub client: ClientId,
    pub call: Timestamp,
    pub ret: Timestamp,
    pub description: String,
    pub input: KvInput,
    pub output: KvOutput,
}

/// The file written by [`Annotations::write_timeline`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub run_id: RunId,
    pub generated_at: DateTime<Utc>,
    pub outcome: String,
    pub operations: Vec<TimelineOperation>,
    pub annotations: Vec<Annotation>,
}

/// Per-test annotation sink.
#[derive(Debug)]
pub struct Annotations {
    clock: Arc<OpLog>,
    vis: VisConfig,
    state: Mutex<State>,
}

impl Annotations {
    /// Creates a sink timestamped by `clock`.
    pub fn new(clock: Arc<OpLog>, vis: VisConfig) -> Self {
        Self {
            clock,
            vis,
            state: Mutex::new(State::default()),
        }
    }

    /// The visualization settings.
    pub fn vis(&self) -> &VisConfig {
        &self.vis
    }

    fn enabled(&self) -> bool {
        self.vis.mode != VisMode::Never
    }

    /// Records an instantaneous event.
    pub async fn annotate_point(
        &self,
        tag: &str,
        description: impl Into<String>,
        details: impl Into<String>,
        color: &str,
    ) {
        let now = self.clock.timestamp();
        self.annotate_span(tag, now, now, description.into(), details.into(), color)
            .await;
    }

    /// Records an interval from `start` until now.
    pub async fn annotate_interval(
        &self,
        tag: &str,
        start: Timestamp,
        description: impl Into<String>,
        details: impl Into<String>,
        color: &str,
    ) {
        let now = self.clock.timestamp();
        self.annotate_span(tag, start, now, description.into(), details.into(), color)
            .await;
    }

    async fn annotate_span(
        &self,
        tag: &str,
        start: Timestamp,
        end: Timestamp,
        description: String,
        details: String,
        color: &str,
    ) {
        if !self.enabled() {
            return;
        }
        self.state.lock().await.annotations.push(Annotation {
            tag: tag.to_string(),
            start,
            end,
            description,
            details,
            background_color: color.to_string(),
        });
    }

    /// Opens an interval under `tag` that stays open until
    /// [`annotate_continuous_end`](Self::annotate_continuous_end).
    ///
    /// An identical open interval is left alone. A different one is closed
    /// now and replaced.
    pub async fn annotate_continuous_start(
        &self,
        tag: &str,
        description: impl Into<String>,
        details: impl Into<String>,
        color: &str,
    ) {
        if !self.enabled() {
            return;
        }
        let now = self.clock.timestamp();
        let next = Continuous {
            start: now,
            description: description.into(),
            details: details.into(),
            background_color: color.to_string(),
        };

        let mut state = self.state.lock().await;
        if let Some(open) = state.continuous.get(tag) {
            if open.description == next.description
                && open.details == next.details
                && open.background_color == next.background_color
            {
                return;
            }
        }
        if let Some(open) = state.continuous.insert(tag.to_string(), next) {
            state.annotations.push(open.close(tag.to_string(), now));
        }
    }

    /// Closes the open interval under `tag`, if any.
    pub async fn annotate_continuous_end(&self, tag: &str) {
        let now = self.clock.timestamp();
        let mut state = self.state.lock().await;
        if let Some(open) = state.continuous.remove(tag) {
            state.annotations.push(open.close(tag.to_string(), now));
        }
    }

    /// Closes every open interval, appends a closing info interval labelled
    /// `outcome` and returns all annotations.
    pub async fn finalize(&self, outcome: &str) -> Vec<Annotation> {
        let now = self.clock.timestamp();
        let mut state = self.state.lock().await;

        let mut annotations = state.annotations.clone();
        let mut open: Vec<_> = state.continuous.clone().into_iter().collect();
        open.sort_by(|a, b| a.0.cmp(&b.0));
        annotations.extend(open.into_iter().map(|(tag, c)| c.close(tag, now)));
        annotations.push(Annotation {
            tag: TAG_INFO.to_string(),
            start: now,
            end: now + CLOSING_INTERVAL,
            description: outcome.to_string(),
            details: outcome.to_string(),
            background_color: colors::INFO.to_string(),
        });

        state.finalized = true;
        annotations
    }

    /// Returns true once a timeline has been produced.
    pub async fn is_finalized(&self) -> bool {
        self.state.lock().await.finalized
    }

    /// Drops all annotations.
    pub async fn clear(&self) {
        *self.state.lock().await = State::default();
    }

    /// Finalizes and writes a timeline of `history` labelled `outcome`,
    /// regardless of the visualization mode.
    pub async fn write_timeline(&self, history: &History, outcome: &str) -> Result<PathBuf> {
        let annotations = self.finalize(outcome).await;
        let timeline = Timeline {
            run_id: history.run_id,
            generated_at: Utc::now(),
            outcome: outcome.to_string(),
            operations: history
                .iter()
                .map(|op| TimelineOperation {
                    id: op.id,
                    client: op.client,
                    call: op.call,
                    ret: op.ret,
                    description: format!("{} -> {}", op.input, op.output),
                    input: op.input.clone(),
                    output: op.output.clone(),
                })
                .collect(),
            annotations,
        };

        let path = match &self.vis.file {
            Some(path) => path.clone(),
            None => {
                let file = tempfile::Builder::new()
                    .prefix("kvlock-timeline-")
                    .suffix(".json")
                    .tempfile()?;
                let (_, path) = file.keep().map_err(|e| e.error)?;
                path
            }
        };
        tokio::fs::write(&path, serde_json::to_vec_pretty(&timeline)?).await?;
        info!(path = %path.display(), outcome, "wrote timeline");
        Ok(path)
    }

    /// Writes a timeline if the visualization mode asks for one after a
    /// test with this outcome.
    pub async fn visualize(
        &self,
        history: &History,
        failed: bool,
        outcome: &str,
    ) -> Result<Option<PathBuf>> {
        if !self.vis.mode.should_write(failed) {
            return Ok(None);
        }
        self.write_timeline(history, outcome).await.map(Some)
    }

    /// End-of-test hook: writes an annotation-only timeline unless one was
    /// already produced or the mode rules it out, then clears the sink.
    pub async fn cleanup(&self, failed: bool, outcome: &str) -> Result<Option<PathBuf>> {
        let skip = !self.vis.mode.should_write(failed) || self.is_finalized().await;
        let written = if skip {
            debug!(outcome, "skipping timeline");
            None
        } else {
            Some(self.write_timeline(&History::new(RunId::new()), outcome).await?)
        };
        self.clear().await;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(mode: VisMode, file: Option<PathBuf>) -> Annotations {
        Annotations::new(Arc::new(OpLog::new()), VisConfig { mode, file })
    }

    #[tokio::test]
    async fn test_finalize_closes_continuous() {
        let an = sink(VisMode::Always, None);
        an.annotate_point(TAG_INFO, "begin", "reliable", colors::INFO).await;
        an.annotate_continuous_start(TAG_FAILURE, "unreliable", "drops", colors::FAULT)
            .await;
        an.annotate_continuous_start(TAG_FAILURE, "unreliable", "drops", colors::FAULT)
            .await;

        let annotations = an.finalize("test passed").await;
        assert!(an.is_finalized().await);
        assert_eq!(annotations.len(), 3);
        assert_eq!(annotations[0].start, annotations[0].end);
        assert_eq!(annotations[1].tag, TAG_FAILURE);
        assert!(annotations[1].start <= annotations[1].end);

        let last = &annotations[2];
        assert_eq!(last.tag, TAG_INFO);
        assert_eq!(last.description, "test passed");
        assert_eq!(last.end - last.start, CLOSING_INTERVAL);
    }

    #[tokio::test]
    async fn test_continuous_replace_and_end() {
        let an = sink(VisMode::Always, None);
        an.annotate_continuous_start(TAG_FAILURE, "a", "", colors::FAULT).await;
        an.annotate_continuous_start(TAG_FAILURE, "b", "", colors::FAULT).await;
        an.annotate_continuous_end(TAG_FAILURE).await;
        an.annotate_continuous_end(TAG_FAILURE).await;

        let annotations = an.finalize("done").await;
        let descriptions: Vec<_> = annotations.iter().map(|a| a.description.as_str()).collect();
        assert_eq!(descriptions, vec!["a", "b", "done"]);
    }

    #[tokio::test]
    async fn test_never_mode_is_inert() {
        let an = sink(VisMode::Never, None);
        an.annotate_point(TAG_INFO, "x", "", colors::INFO).await;
        an.annotate_continuous_start(TAG_FAILURE, "y", "", colors::FAULT).await;
        assert_eq!(an.finalize("end").await.len(), 1);

        let written = an.visualize(&History::new(RunId::new()), true, "failed").await.unwrap();
        assert!(written.is_none());
    }

    #[tokio::test]
    async fn test_write_timeline_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.json");
        let log = Arc::new(OpLog::new());
        let an = Annotations::new(
            log.clone(),
            VisConfig {
                mode: VisMode::OnFailure,
                file: Some(path.clone()),
            },
        );

        log.append(
            ClientId(1),
            KvInput::get("k"),
            KvOutput::Get(Err(kvlock_core::KvError::NoKey)),
            1,
            2,
        )
        .await;
        let history = log.freeze(Default::default()).await;

        assert!(an.visualize(&history, false, "passed").await.unwrap().is_none());
        let written = an.visualize(&history, true, "failed").await.unwrap();
        assert_eq!(written.as_deref(), Some(path.as_path()));

        let timeline: Timeline =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(timeline.outcome, "failed");
        assert_eq!(timeline.operations.len(), 1);
        assert_eq!(timeline.operations[0].client, ClientId(1));
        assert_eq!(timeline.annotations.len(), 1);

        // A timeline was produced, so cleanup only clears.
        assert!(an.cleanup(true, "failed").await.unwrap().is_none());
        assert!(!an.is_finalized().await);
    }

    #[tokio::test]
    async fn test_default_config_writes_nothing() {
        let an = Annotations::new(
            Arc::new(OpLog::new()),
            crate::config::HarnessConfig::default().vis,
        );
        an.annotate_point(TAG_INFO, "begin", "", colors::INFO).await;
        assert!(an.cleanup(true, "test failed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_writes_temp_file() {
        let an = sink(VisMode::Always, None);
        an.annotate_point(TAG_INFO, "begin", "", colors::INFO).await;

        let path = an.cleanup(false, "test passed").await.unwrap().unwrap();
        let timeline: Timeline =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(timeline.operations.is_empty());
        assert_eq!(timeline.annotations.len(), 2);
        std::fs::remove_file(path).unwrap();
    }
}
