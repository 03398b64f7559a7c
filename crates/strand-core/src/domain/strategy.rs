//! Strategy and Priority - submission options that never change after submit.

use serde::{Deserialize, Serialize};

/// Execution path a task is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Inline on the caller; done before `submit_task` returns.
    Immediate,
    /// On the next idle slice of the cooperative scheduler (or at timeout).
    Deferred,
    /// On a pool worker, queued by priority when the pool is saturated.
    Pooled,
    /// Split into N pooled sub-tasks whose results are aggregated.
    Chunked,
    /// Through a prepared accelerated context, falling back to Immediate.
    Accelerated,
}

/// Lower value = more urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
    Background = 4,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Critical),
            1 => Ok(Priority::High),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::Low),
            4 => Ok(Priority::Background),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_orders_before_background() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::Low < Priority::Background);
        assert_eq!(Priority::Critical.as_u8(), 0);
        assert_eq!(Priority::Background.as_u8(), 4);
    }

    #[test]
    fn priority_from_numeric_level() {
        assert_eq!(Priority::try_from(3), Ok(Priority::Low));
        assert_eq!(Priority::try_from(9), Err(9));
        assert_eq!(Priority::default(), Priority::Medium);
    }
}
