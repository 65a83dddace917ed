//! Smooth weighted round-robin.
//!
//! Each pick adds every candidate's weight to its running score, selects the
//! highest score and subtracts the total weight from it. Over `sum(weights)`
//! picks each target is chosen exactly `weight` times, interleaved.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::load_balancer::LoadBalancer;

#[derive(Debug, Default)]
pub struct Weighted {
    weights: HashMap<String, u32>,
    scores: Mutex<HashMap<String, i64>>,
}

impl Weighted {
    /// Targets missing from `weights` get weight 1.
    pub fn new(weights: HashMap<String, u32>) -> Self {
        Self {
            weights,
            scores: Mutex::new(HashMap::new()),
        }
    }

    fn weight_of(&self, target: &str) -> i64 {
        i64::from(self.weights.get(target).copied().unwrap_or(1))
    }
}

impl LoadBalancer for Weighted {
    fn next_target<'a>(&self, candidates: &'a [String]) -> Option<&'a str> {
        let mut scores = self.scores.lock();
        let mut total = 0;
        let mut best: Option<(&'a str, i64)> = None;

        for target in candidates {
            let weight = self.weight_of(target);
            if weight == 0 {
                continue;
            }
            total += weight;

            let score = scores.entry(target.clone()).or_insert(0);
            *score += weight;
            if best.map_or(true, |(_, top)| *score > top) {
                best = Some((target, *score));
            }
        }

        // Every candidate has weight 0: fall back to the first.
        let Some((chosen, _)) = best else {
            return candidates.first().map(String::as_str);
        };
        if let Some(score) = scores.get_mut(chosen) {
            *score -= total;
        }
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smooth_distribution() {
        let weights = HashMap::from([("http://a".to_string(), 5), ("http://b".to_string(), 1)]);
        let lb = Weighted::new(weights);
        let targets = vec!["http://a".to_string(), "http://b".to_string(), "http://c".to_string()];

        let picks: Vec<&str> = (0..7).map(|_| lb.next_target(&targets).unwrap()).collect();
        assert_eq!(picks.iter().filter(|t| **t == "http://a").count(), 5);
        assert_eq!(picks.iter().filter(|t| **t == "http://b").count(), 1);
        assert_eq!(picks.iter().filter(|t| **t == "http://c").count(), 1);
        // Smooth: the heavy target is not picked five times in a row.
        assert_ne!(&picks[..5], &["http://a"; 5]);
    }

    #[test]
    fn test_zero_weights() {
        let weights = HashMap::from([("http://a".to_string(), 0)]);
        let lb = Weighted::new(weights);
        let targets = vec!["http://a".to_string()];
        assert_eq!(lb.next_target(&targets), Some("http://a"));
    }
}
