use super::point::{Batch, Point};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Timeout,
    Shutdown,
}

impl FlushReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Timeout => "timeout",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug)]
enum State {
    Idle,
    Accumulating { batch: Batch, deadline: Instant },
}

/// Two-state batch builder.
///
/// The first point after [`State::Idle`] opens a batch and arms the deadline. Later points never
/// move the deadline. A batch closes when it reaches `max_points` (returned from
/// [`BatchAssembler::push`]) or when the owner calls [`BatchAssembler::take`] after the
/// deadline or on shutdown.
#[derive(Debug)]
pub struct BatchAssembler {
    state: State,
    max_points: usize,
    timeout: Duration,
}

impl BatchAssembler {
    pub fn new(max_points: usize, timeout: Duration) -> Self {
        Self {
            state: State::Idle,
            max_points: max_points.max(1),
            timeout,
        }
    }

    pub fn push(&mut self, point: Point, now: Instant) -> Option<Batch> {
        match &mut self.state {
            State::Idle => {
                let mut batch = Vec::with_capacity(self.max_points);
                batch.push(point);
                self.state = State::Accumulating {
                    batch,
                    deadline: now + self.timeout,
                };
            }
            State::Accumulating { batch, .. } => batch.push(point),
        }
        if self.len() >= self.max_points {
            return self.take();
        }
        None
    }

    /// Closes the open batch, if any, and returns to idle.
    pub fn take(&mut self) -> Option<Batch> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => None,
            State::Accumulating { batch, .. } => Some(batch),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            State::Idle => None,
            State::Accumulating { deadline, .. } => Some(*deadline),
        }
    }

    pub fn len(&self) -> usize {
        match &self.state {
            State::Idle => 0,
            State::Accumulating { batch, .. } => batch.len(),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::point::FieldValue;
    use chrono::Utc;

    fn point(n: i64) -> Point {
        Point::new("node", Utc::now()).field("n", FieldValue::Integer(n))
    }

    #[test]
    fn deadline_is_armed_once_per_batch() {
        let start = Instant::now();
        let mut assembler = BatchAssembler::new(10, Duration::from_secs(5));
        assert!(assembler.is_idle());
        assert!(assembler.deadline().is_none());

        assert!(assembler.push(point(1), start).is_none());
        let armed = assembler.deadline().unwrap();
        assert_eq!(armed, start + Duration::from_secs(5));

        assert!(assembler
            .push(point(2), start + Duration::from_secs(3))
            .is_none());
        assert_eq!(assembler.deadline(), Some(armed));
        assert_eq!(assembler.len(), 2);
    }

    #[test]
    fn reaching_threshold_closes_batch_in_order() {
        let now = Instant::now();
        let mut assembler = BatchAssembler::new(3, Duration::from_secs(5));
        assert!(assembler.push(point(1), now).is_none());
        assert!(assembler.push(point(2), now).is_none());
        let batch = assembler.push(point(3), now).unwrap();
        let order: Vec<_> = batch.iter().map(|point| point.fields["n"].clone()).collect();
        assert_eq!(
            order,
            vec![
                FieldValue::Integer(1),
                FieldValue::Integer(2),
                FieldValue::Integer(3)
            ]
        );
        assert!(assembler.is_idle());
        assert!(assembler.take().is_none());
    }

    #[test]
    fn take_rearms_on_next_point() {
        let start = Instant::now();
        let mut assembler = BatchAssembler::new(10, Duration::from_secs(5));
        assembler.push(point(1), start);
        assert_eq!(assembler.take().map(|batch| batch.len()), Some(1));

        let later = start + Duration::from_secs(60);
        assembler.push(point(2), later);
        assert_eq!(assembler.deadline(), Some(later + Duration::from_secs(5)));
    }
}
