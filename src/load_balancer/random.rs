//! Uniform random selection.

use crate::load_balancer::LoadBalancer;

#[derive(Debug, Default)]
pub struct Random;

impl LoadBalancer for Random {
    fn next_target<'a>(&self, candidates: &'a [String]) -> Option<&'a str> {
        if candidates.is_empty() {
            return None;
        }
        Some(&candidates[fastrand::usize(..candidates.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_stays_in_candidates() {
        let targets = vec!["http://a".to_string(), "http://b".to_string()];
        for _ in 0..50 {
            let picked = Random.next_target(&targets).unwrap();
            assert!(targets.iter().any(|t| t == picked));
        }
        assert_eq!(Random.next_target(&[]), None);
    }
}
