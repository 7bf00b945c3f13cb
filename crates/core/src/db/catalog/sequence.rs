use crate::db::names::QName;
use crate::error::Result;
use anyhow::anyhow;

/// How many values a sequence reserves ahead of use. The allocation
/// watermark is what the commit log persists; on restart the sequence
/// resumes from it, never below a handed-out value.
pub const SEQUENCE_PREALLOCATION_AMOUNT: i64 = 4096;

/// A named number generator with wrap-around semantics.
#[derive(Debug)]
pub struct NumberSequence {
    pub name: QName,
    value: i64,
    start: i64,
    increment: i64,
    min_value: i64,
    max_value: i64,
    allocated: i64,
}

impl NumberSequence {
    pub fn new(name: QName, start: i64, increment: i64, min_value: i64, max_value: i64) -> Self {
        Self {
            name,
            value: start,
            start,
            increment,
            min_value,
            max_value,
            allocated: start,
        }
    }

    pub fn with_defaults(name: QName) -> Self {
        Self::new(name, 1, 1, 1, i64::MAX)
    }

    /// The next value after `value`, wrapping around the [min, max]
    /// interval in either direction.
    ///
    /// (min: 1, max: 10, increment: 3, value: 9) -> 2
    /// (min: 1, max: 10, increment: -3, value: 1) -> 8
    fn next_in_sequence(min: i64, max: i64, increment: i64, value: i64) -> i64 {
        let span = max - min + 1;
        let mut next = value + increment;
        if increment > 0 {
            if next > max {
                next = min + (next - max - 1) % span;
            }
        } else if next < min {
            next = max - (min - next - 1) % span;
        }
        next
    }

    fn needs_allocation(&self) -> bool {
        self.value >= self.allocated
    }

    /// Hands out the next value, extending the allocation watermark by
    /// a preallocation batch when the current one is used up. Returns
    /// whether a fresh allocation happened, so the caller knows to log
    /// the sequence at commit.
    pub fn next_value(&mut self) -> Result<(i64, bool)> {
        if self.increment == 0 {
            return Err(anyhow!("sequence {} cannot advance: increment is 0", self.name).into());
        }
        let mut allocated = false;
        if self.needs_allocation() {
            self.allocated = self.nth_value(SEQUENCE_PREALLOCATION_AMOUNT as usize);
            allocated = true;
        }
        let value = self.value;
        self.value = Self::next_in_sequence(self.min_value, self.max_value, self.increment, value);
        Ok((value, allocated))
    }

    pub fn nth_value(&self, n: usize) -> i64 {
        let mut value = self.value;
        for _ in 0..n {
            value = Self::next_in_sequence(self.min_value, self.max_value, self.increment, value);
        }
        value
    }

    pub fn current_allocation(&self) -> i64 {
        self.allocated
    }

    /// Restarts the sequence at its declared start; used by ALTER
    /// SEQUENCE RESTART.
    pub fn reset(&mut self) {
        self.value = self.start;
        self.allocated = self.start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::names::NameRegistry;
    use quartzdb_primitives::ObjectKind;

    fn sequence(start: i64, increment: i64, min: i64, max: i64) -> NumberSequence {
        let name = NameRegistry::new().new_name("SQ", false, ObjectKind::Sequence);
        NumberSequence::new(name, start, increment, min, max)
    }

    #[test]
    fn values_advance_by_increment() {
        let mut seq = sequence(1, 1, 1, i64::MAX);
        assert_eq!(seq.next_value().unwrap().0, 1);
        assert_eq!(seq.next_value().unwrap().0, 2);
        assert_eq!(seq.next_value().unwrap().0, 3);
    }

    #[test]
    fn wrap_around_in_both_directions() {
        assert_eq!(NumberSequence::next_in_sequence(1, 10, 3, 9), 2);
        assert_eq!(NumberSequence::next_in_sequence(1, 10, 20, 5), 5);
        assert_eq!(NumberSequence::next_in_sequence(1, 10, -3, 1), 8);
        assert_eq!(NumberSequence::next_in_sequence(1, 10, -3, 4), 1);
    }

    #[test]
    fn first_value_reports_an_allocation() {
        let mut seq = sequence(1, 1, 1, i64::MAX);
        let (value, allocated) = seq.next_value().unwrap();
        assert_eq!(value, 1);
        assert!(allocated);
        let (_, allocated) = seq.next_value().unwrap();
        assert!(!allocated);
        assert_eq!(seq.current_allocation(), seq.nth_value(SEQUENCE_PREALLOCATION_AMOUNT as usize - 2));
    }

    #[test]
    fn zero_increment_cannot_advance() {
        let mut seq = sequence(1, 0, 1, 10);
        assert!(seq.next_value().is_err());
    }

    #[test]
    fn reset_returns_to_start() {
        let mut seq = sequence(5, 1, 1, i64::MAX);
        seq.next_value().unwrap();
        seq.next_value().unwrap();
        seq.reset();
        assert_eq!(seq.next_value().unwrap().0, 5);
    }
}
