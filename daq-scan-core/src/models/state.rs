use super::error::ScanError;

/// Continuous scan controller state machine.
///
/// State transitions:
/// ```text
/// idle → starting → running → stopping → idle
///           ↓          ↓
///         failed ←─────┘
/// ```
/// `Failed` ends a scan; `stop_scan` acknowledges it and returns to idle,
/// and a new scan may be started from either state.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    Idle,
    Starting,
    Running { consumed: u64 },
    Stopping,
    Failed(ScanError),
}

impl ScanState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Whether `start_scan` is allowed from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running { .. } => "running",
            Self::Stopping => "stopping",
            Self::Failed(_) => "failed",
        }
    }

    pub fn error(&self) -> Option<&ScanError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}
