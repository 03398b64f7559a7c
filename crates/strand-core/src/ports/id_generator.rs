//! IdGenerator port - TaskId の採番
//!
//! Engine は submit のたびにここから TaskId を受け取る。
//! 同じミリ秒内でも ID は投入順に並ぶ（ログを ID でソートすると投入順になる）。

use std::sync::{Mutex, PoisonError};

use crate::domain::TaskId;
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// ULID generator on top of a `Clock`.
///
/// Ids are strictly increasing: a second id in the same millisecond (or
/// under a clock that went backwards) is the previous one incremented.
pub struct UlidGenerator<C> {
    clock: C,
    last: Mutex<Option<Ulid>>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let fresh = Ulid::from_parts(timestamp_ms, rand::random());

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match *last {
            Some(prev) if fresh <= prev => prev.increment().unwrap_or(fresh),
            _ => fresh,
        };
        *last = Some(next);
        TaskId::from(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ids_increase_in_submission_order() {
        let ids = UlidGenerator::new(SystemClock);
        let generated: Vec<TaskId> = (0..100).map(|_| ids.generate_task_id()).collect();
        assert!(generated.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn frozen_clock_still_yields_distinct_ordered_ids() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let ids = UlidGenerator::new(FixedClock::new(at));

        let a = ids.generate_task_id();
        let b = ids.generate_task_id();
        assert!(a < b);
        assert_eq!(a.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
        assert_eq!(b.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
    }
}
