use shared::PredictionResult;
use std::cmp::Ordering;

/// Picks the `max_results` highest scores, then drops anything under
/// `threshold`. Scores are used as-is; no softmax is applied.
pub fn rank(
    scores: &[f32],
    class_labels: &[String],
    threshold: f32,
    max_results: usize,
) -> Vec<PredictionResult> {
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    // Equal scores keep ascending class order; NaN sorts last.
    indices.sort_by(|&a, &b| descending(scores[a], scores[b]).then(a.cmp(&b)));

    indices
        .into_iter()
        .take(max_results)
        .filter(|&idx| scores[idx] >= threshold)
        .map(|idx| PredictionResult {
            class_name: label_for(class_labels, idx),
            confidence: round4(scores[idx]),
        })
        .collect()
}

fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

fn label_for(class_labels: &[String], idx: usize) -> String {
    class_labels
        .get(idx)
        .cloned()
        .unwrap_or_else(|| idx.to_string())
}

fn round4(score: f32) -> f64 {
    (f64::from(score) * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn names(results: &[PredictionResult]) -> Vec<&str> {
        results.iter().map(|r| r.class_name.as_str()).collect()
    }

    #[test]
    fn sorted_by_descending_score() {
        let scores = [0.1, 0.6, 0.3];
        let out = rank(&scores, &labels(&["a", "b", "c"]), 0.0, 5);
        assert_eq!(names(&out), vec!["b", "c", "a"]);
    }

    #[test]
    fn ties_prefer_lower_class_index() {
        let scores = [0.2, 0.4, 0.4, 0.4];
        let out = rank(&scores, &labels(&["a", "b", "c", "d"]), 0.0, 2);
        assert_eq!(names(&out), vec!["b", "c"]);
    }

    #[test]
    fn truncates_before_thresholding() {
        let scores = [0.9, 0.05, 0.8, 0.7, 0.6];
        let out = rank(&scores, &[], 0.65, 3);
        assert_eq!(names(&out), vec!["0", "2", "3"]);

        let out = rank(&scores, &[], 0.85, 3);
        assert_eq!(names(&out), vec!["0"]);
    }

    #[test]
    fn below_threshold_entries_are_dropped_not_filled() {
        let out = rank(&[0.1, 0.2, 0.05], &labels(&["a", "b", "c"]), 0.25, 5);
        assert!(out.is_empty());
    }

    #[test]
    fn threshold_is_inclusive() {
        let out = rank(&[0.25, 0.1], &labels(&["a", "b"]), 0.25, 5);
        assert_eq!(names(&out), vec!["a"]);
    }

    #[test]
    fn missing_labels_fall_back_to_index() {
        let out = rank(&[0.1, 0.3, 0.9], &labels(&["only"]), 0.0, 3);
        assert_eq!(names(&out), vec!["2", "1", "only"]);
    }

    #[test]
    fn confidence_rounded_to_four_places() {
        let out = rank(&[0.123_456_7], &[], 0.0, 1);
        assert_eq!(out[0].confidence, 0.1235);
    }

    #[test]
    fn nan_scores_never_surface() {
        let out = rank(&[f32::NAN, 0.5, 0.4], &[], 0.0, 2);
        assert_eq!(names(&out), vec!["1", "2"]);
    }

    #[test]
    fn never_exceeds_max_results_and_respects_threshold() {
        let scores: Vec<f32> = (0..100).map(|i| (i % 17) as f32 / 16.0).collect();
        for max_results in 1..8 {
            for threshold in [0.0, 0.3, 0.75, 1.0] {
                let out = rank(&scores, &[], threshold, max_results);
                assert!(out.len() <= max_results);
                assert!(out.iter().all(|r| r.confidence >= f64::from(threshold)));
                assert!(out.windows(2).all(|w| w[0].confidence >= w[1].confidence));
            }
        }
    }

    #[test]
    fn empty_scores_give_empty_result() {
        assert!(rank(&[], &[], 0.0, 5).is_empty());
    }
}
