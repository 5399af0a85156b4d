use serde::Serialize;

/// Coarse pipeline stage reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extracting,
    Analyzing,
    Converting,
    AnalyzingImages,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extracting => "extracting",
            Self::Analyzing => "analyzing",
            Self::Converting => "converting",
            Self::AnalyzingImages => "analyzing_images",
            Self::Complete => "complete",
        }
    }
}

/// Progress event delivered at strategy transition points.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
    pub progress_percent: u8,
}

/// Caller-supplied progress sink. Advisory only; may borrow caller state.
pub type ProgressCallback<'a> = dyn Fn(&ProgressEvent) + Send + Sync + 'a;

/// Thin wrapper so pipeline code can report without checking for a sink.
#[derive(Clone, Copy)]
pub struct ProgressReporter<'a> {
    sink: Option<&'a ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: Option<&'a ProgressCallback<'a>>) -> Self {
        Self { sink }
    }

    pub fn silent() -> Self {
        Self { sink: None }
    }

    pub fn report(&self, stage: Stage, message: impl Into<String>, progress_percent: u8) {
        let event = ProgressEvent {
            stage,
            message: message.into(),
            progress_percent: progress_percent.min(100),
        };
        tracing::debug!(
            stage = event.stage.as_str(),
            percent = event.progress_percent,
            "{}",
            event.message
        );
        if let Some(sink) = self.sink {
            sink(&event);
        }
    }
}
