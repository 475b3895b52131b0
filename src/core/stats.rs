//! Statistics over stored results.

use crate::core::emotion::{CanonicalResult, EmotionClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Count and share of a single class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassShare {
    pub emotion: EmotionClass,
    pub count: usize,
    /// Percentage of the total, rounded to two decimals
    pub percentage: f64,
}

/// Summary of a history.
///
/// `distribution` lists classes in the order they were first encountered
/// (oldest record first). The dominant class is the one with the highest
/// count; ties go to the class encountered first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: usize,
    pub distribution: Vec<ClassShare>,
    pub dominant: Option<EmotionClass>,
    pub average_confidence: f64,
    pub confidence_std_dev: f64,
    pub first_observed: Option<DateTime<Utc>>,
    pub last_observed: Option<DateTime<Utc>>,
}

impl HistoryStats {
    pub fn count(&self, class: EmotionClass) -> usize {
        self.share(class).map(|s| s.count).unwrap_or(0)
    }

    pub fn percentage(&self, class: EmotionClass) -> f64 {
        self.share(class).map(|s| s.percentage).unwrap_or(0.0)
    }

    fn share(&self, class: EmotionClass) -> Option<&ClassShare> {
        self.distribution.iter().find(|s| s.emotion == class)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Compute statistics over results given in insertion order.
pub fn compute_stats<'a, I>(results: I) -> HistoryStats
where
    I: IntoIterator<Item = &'a CanonicalResult>,
{
    let mut counts: Vec<(EmotionClass, usize)> = Vec::new();
    let mut confidences: Vec<f64> = Vec::new();
    let mut first_observed = None;
    let mut last_observed = None;

    for result in results {
        match counts.iter_mut().find(|(class, _)| *class == result.emotion) {
            Some((_, count)) => *count += 1,
            None => counts.push((result.emotion, 1)),
        }
        confidences.push(result.confidence);
        first_observed.get_or_insert(result.observed_at);
        last_observed = Some(result.observed_at);
    }

    let total = confidences.len();
    if total == 0 {
        return HistoryStats::default();
    }

    let mut dominant: Option<(EmotionClass, usize)> = None;
    for &(class, count) in &counts {
        // Strictly greater keeps the first-encountered class on ties.
        if dominant.map_or(true, |(_, best)| count > best) {
            dominant = Some((class, count));
        }
    }

    let distribution = counts
        .into_iter()
        .map(|(emotion, count)| ClassShare {
            emotion,
            count,
            percentage: round2(count as f64 * 100.0 / total as f64),
        })
        .collect();

    let average_confidence = confidences.iter().mean();
    let confidence_std_dev = if total > 1 {
        confidences.iter().population_std_dev()
    } else {
        0.0
    };

    HistoryStats {
        total,
        distribution,
        dominant: dominant.map(|(class, _)| class),
        average_confidence,
        confidence_std_dev,
        first_observed,
        last_observed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(classes: &[(EmotionClass, f64)]) -> Vec<CanonicalResult> {
        let now = Utc::now();
        classes
            .iter()
            .map(|&(class, conf)| CanonicalResult::new(class, conf, now))
            .collect()
    }

    #[test]
    fn test_empty_stats() {
        let stats = compute_stats(std::iter::empty::<&CanonicalResult>());
        assert_eq!(stats.total, 0);
        assert!(stats.dominant.is_none());
        assert_eq!(stats.average_confidence, 0.0);
        assert!(stats.distribution.is_empty());
    }

    #[test]
    fn test_dominant_tie_goes_to_first_encountered() {
        use EmotionClass::*;
        let data = results(&[
            (Angry, 0.5),
            (Happy, 0.5),
            (Happy, 0.5),
            (Sad, 0.5),
            (Angry, 0.5),
            (Sad, 0.5),
            (Happy, 0.5),
            (Sad, 0.5),
        ]);
        // Happy: 3, Sad: 3, Angry: 2. Happy was seen before Sad.
        let stats = compute_stats(&data);
        assert_eq!(stats.dominant, Some(Happy));

        let data = results(&[(Sad, 0.5), (Happy, 0.5), (Happy, 0.5), (Sad, 0.5)]);
        assert_eq!(compute_stats(&data).dominant, Some(Sad));
    }

    #[test]
    fn test_distribution_and_percentages() {
        use EmotionClass::*;
        let data = results(&[(Happy, 0.9), (Sad, 0.6), (Happy, 0.3)]);
        let stats = compute_stats(&data);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.count(Happy), 2);
        assert_eq!(stats.count(Sad), 1);
        assert_eq!(stats.count(Angry), 0);
        assert_eq!(stats.percentage(Happy), 66.67);
        assert_eq!(stats.percentage(Sad), 33.33);
        assert_eq!(stats.distribution[0].emotion, Happy);
        assert!((stats.average_confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_spread() {
        use EmotionClass::*;
        let stats = compute_stats(&results(&[(Happy, 0.2), (Happy, 0.4)]));
        assert!((stats.confidence_std_dev - 0.1).abs() < 1e-9);

        let stats = compute_stats(&results(&[(Happy, 0.2)]));
        assert_eq!(stats.confidence_std_dev, 0.0);
    }
}
