use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Resolving,
    Downloading,
    Processing,
    Storing,
    Completed,
}

impl ProgressStage {
    /// Slice of the overall 0..=100 range owned by this stage.
    fn span(&self) -> (u8, u8) {
        match self {
            ProgressStage::Resolving => (0, 10),
            ProgressStage::Downloading => (10, 70),
            ProgressStage::Processing => (70, 90),
            ProgressStage::Storing => (90, 99),
            ProgressStage::Completed => (100, 100),
        }
    }

    pub fn overall(&self, stage_percent: u8) -> u8 {
        let (start, end) = self.span();
        let local = u32::from(stage_percent.min(100));
        let scaled = u32::from(start) + local * u32::from(end - start) / 100;
        scaled as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub request_id: String,
    pub stage: ProgressStage,
    pub percent: u8,
}

/// Best-effort progress reporting. Events are dropped, never awaited, when the
/// channel is full or nobody listens.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<mpsc::Sender<ProgressEvent>>,
    request_id: String,
}

impl ProgressSink {
    pub fn new(sender: mpsc::Sender<ProgressEvent>, request_id: impl Into<String>) -> Self {
        Self {
            sender: Some(sender),
            request_id: request_id.into(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, stage: ProgressStage, stage_percent: u8) {
        let Some(sender) = &self.sender else {
            return;
        };
        let event = ProgressEvent {
            request_id: self.request_id.clone(),
            stage,
            percent: stage.overall(stage_percent),
        };
        if let Err(error) = sender.try_send(event) {
            trace!(error = %error, "progress event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_percent_maps_into_overall_range() {
        assert_eq!(ProgressStage::Resolving.overall(0), 0);
        assert_eq!(ProgressStage::Downloading.overall(50), 40);
        assert_eq!(ProgressStage::Downloading.overall(250), 70);
        assert_eq!(ProgressStage::Completed.overall(0), 100);
    }

    #[tokio::test]
    async fn full_channel_drops_events_without_blocking() {
        let (sender, mut receiver) = mpsc::channel(1);
        let sink = ProgressSink::new(sender, "task_1");
        sink.emit(ProgressStage::Resolving, 0);
        sink.emit(ProgressStage::Downloading, 10);
        let first = receiver.recv().await.unwrap();
        assert_eq!(first.stage, ProgressStage::Resolving);
        assert!(receiver.try_recv().is_err());

        drop(receiver);
        sink.emit(ProgressStage::Completed, 100);
        ProgressSink::disabled().emit(ProgressStage::Completed, 100);
    }
}
