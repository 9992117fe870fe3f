use chrono::{DateTime, Utc};

/// Source of "now" for the stores. Fixed clocks keep tests deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }

    /// Moves a fixed clock forward. No effect on the system clock.
    #[cfg(test)]
    pub fn advance(&mut self, delta: chrono::Duration) {
        if let Clock::Fixed(t) = self {
            *t += delta;
        }
    }
}

/// 2023-11-14T22:13:20Z.
#[cfg(test)]
pub(crate) fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("fixed timestamp should be valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_only_moves_when_advanced() {
        let mut clock = Clock::fixed(fixed_now());
        assert_eq!(clock.now(), clock.now());
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now() - fixed_now(), chrono::Duration::minutes(5));

        let mut system = Clock::System;
        system.advance(chrono::Duration::days(365));
        assert!(matches!(system, Clock::System));
    }
}
