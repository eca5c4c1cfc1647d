//! Session limits derived from the size of a topic.

use serde::{Deserialize, Serialize};

pub const MIN_CONVERSATIONS: u32 = 8;
pub const MAX_CONVERSATIONS: u32 = 50;
const MIN_COMPLETION_THRESHOLD: u32 = 6;
const MIN_QUIZ_FREQUENCY: u32 = 3;

/// Per-session limits, computed once when the session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLimits {
    pub max_conversations: u32,
    pub completion_threshold: u32,
    /// Suggest a quiz every `quiz_frequency` exchanges.
    pub quiz_frequency: u32,
}

/// Computes the limits for a topic with `content_chunks` subtopics.
pub fn calculate_limits(content_chunks: usize) -> SessionLimits {
    let doubled = u32::try_from(content_chunks.saturating_mul(2)).unwrap_or(u32::MAX);
    let max_conversations = doubled.clamp(MIN_CONVERSATIONS, MAX_CONVERSATIONS);
    let completion_threshold =
        (f64::from(max_conversations) * 0.6).round() as u32;
    let quiz_frequency = (f64::from(max_conversations) / 5.0).round() as u32;

    SessionLimits {
        max_conversations,
        completion_threshold: completion_threshold.max(MIN_COMPLETION_THRESHOLD),
        quiz_frequency: quiz_frequency.max(MIN_QUIZ_FREQUENCY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_topics_use_the_floor() {
        for n in [0, 1, 4] {
            let limits = calculate_limits(n);
            assert_eq!(limits.max_conversations, 8);
            assert_eq!(limits.completion_threshold, 6);
            assert_eq!(limits.quiz_frequency, 3);
        }
    }

    #[test]
    fn large_topics_are_clamped() {
        let limits = calculate_limits(25);
        assert_eq!(limits.max_conversations, 50);
        assert_eq!(limits.completion_threshold, 30);
        assert_eq!(limits.quiz_frequency, 10);

        assert_eq!(calculate_limits(10_000), limits);
    }

    #[test]
    fn mid_range_rounds() {
        let limits = calculate_limits(9);
        assert_eq!(limits.max_conversations, 18);
        assert_eq!(limits.completion_threshold, 11);
        assert_eq!(limits.quiz_frequency, 4);
    }

    #[test]
    fn limits_are_monotonic() {
        let mut previous = calculate_limits(0);
        for n in 1..40 {
            let current = calculate_limits(n);
            assert!(current.max_conversations >= previous.max_conversations);
            assert!(current.completion_threshold >= previous.completion_threshold);
            assert!(current.quiz_frequency >= previous.quiz_frequency);
            previous = current;
        }
    }
}
