// Cluster selection and load rebalancing.
//
// INVARIANTS:
// 1. ROUND_ROBIN keeps one counter per operation kind and cycles in registration order
// 2. LEAST_LOADED only considers clusters strictly below max_utilization; ties go to the earliest registered
// 3. A migration never moves more than the smaller of the two distances to the mean
// 4. Applying a rebalance plan never increases load variance

use std::collections::HashMap;

use foldmesh_core::{FederationConfig, LoadBalancingStrategy};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::operation::OperationKind;
use crate::registry::FederationCluster;

/// Population variance of `loads`. Zero for fewer than two samples.
pub fn load_variance(loads: &[f64]) -> f64 {
    if loads.len() < 2 {
        return 0.0;
    }
    let mean = mean(loads);
    loads.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / loads.len() as f64
}

fn mean(loads: &[f64]) -> f64 {
    if loads.is_empty() {
        return 0.0;
    }
    loads.iter().sum::<f64>() / loads.len() as f64
}

// ─────────────────────────────────────────────
// Selection
// ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LoadBalancer {
    strategy: LoadBalancingStrategy,
    max_utilization: f64,
    variance_threshold: f64,
    round_robin: HashMap<OperationKind, usize>,
}

impl LoadBalancer {
    pub fn new(strategy: LoadBalancingStrategy, max_utilization: f64, variance_threshold: f64) -> Self {
        Self {
            strategy,
            max_utilization,
            variance_threshold,
            round_robin: HashMap::new(),
        }
    }

    pub fn from_config(config: &FederationConfig) -> Self {
        Self::new(config.strategy, config.max_utilization, config.variance_threshold)
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: LoadBalancingStrategy) {
        self.strategy = strategy;
    }

    /// Pick a target cluster id. `clusters` must be in registration order.
    pub fn select(
        &mut self,
        clusters: &[FederationCluster],
        kind: OperationKind,
        region: Option<&str>,
    ) -> Option<String> {
        if clusters.is_empty() {
            return None;
        }
        let chosen = match self.strategy {
            LoadBalancingStrategy::RoundRobin => self.round_robin(clusters, kind),
            LoadBalancingStrategy::LeastLoaded => self.least_loaded(clusters),
            LoadBalancingStrategy::Geographic => self.geographic(clusters, region),
            LoadBalancingStrategy::SmartRouting => self.smart(clusters, kind),
            LoadBalancingStrategy::Adaptive => {
                let loads: Vec<f64> = clusters.iter().map(|c| c.load_factor).collect();
                let variance = load_variance(&loads);
                if variance > self.variance_threshold {
                    debug!("[LoadBalancer] variance {:.3} above threshold, routing least-loaded", variance);
                    self.least_loaded(clusters)
                } else {
                    self.smart(clusters, kind)
                }
            }
        };
        debug!(
            "[LoadBalancer] {:?} picked {:?} for {}",
            self.strategy, chosen, kind
        );
        chosen
    }

    fn round_robin(&mut self, clusters: &[FederationCluster], kind: OperationKind) -> Option<String> {
        let counter = self.round_robin.entry(kind).or_insert(0);
        let index = *counter % clusters.len();
        *counter = counter.wrapping_add(1);
        Some(clusters[index].cluster_id.clone())
    }

    fn least_loaded(&self, clusters: &[FederationCluster]) -> Option<String> {
        least_loaded_among(clusters.iter(), self.max_utilization)
    }

    fn geographic(&self, clusters: &[FederationCluster], region: Option<&str>) -> Option<String> {
        if let Some(region) = region {
            let local = least_loaded_among(clusters.iter().filter(|c| c.region == region), self.max_utilization);
            if local.is_some() {
                return local;
            }
            debug!("[LoadBalancer] no eligible cluster in region {}, routing least-loaded", region);
        }
        self.least_loaded(clusters)
    }

    // Reads could prefer clusters caching the fold; for now both go least-loaded.
    fn smart(&self, clusters: &[FederationCluster], _kind: OperationKind) -> Option<String> {
        self.least_loaded(clusters)
    }
}

fn least_loaded_among<'a>(
    clusters: impl Iterator<Item = &'a FederationCluster>,
    max_utilization: f64,
) -> Option<String> {
    let mut best: Option<&FederationCluster> = None;
    for cluster in clusters.filter(|c| c.load_factor < max_utilization) {
        match best {
            Some(current) if current.load_factor <= cluster.load_factor => {}
            _ => best = Some(cluster),
        }
    }
    best.map(|c| c.cluster_id.clone())
}

// ─────────────────────────────────────────────
// Rebalancing
// ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub from_cluster: String,
    pub to_cluster: String,
    pub amount: f64,
}

/// Pair overloaded with underloaded clusters and size a migration for each pair.
///
/// A cluster is overloaded above `mean + margin` and underloaded below
/// `mean - margin`. The most overloaded is paired with the most underloaded,
/// then the next pair, until either side runs out. Each pair moves `fraction`
/// of the smaller distance to the mean.
pub fn plan_rebalance(loads: &[(String, f64)], margin: f64, fraction: f64) -> Vec<Migration> {
    let values: Vec<f64> = loads.iter().map(|(_, l)| *l).collect();
    let mean = mean(&values);

    let mut over: Vec<&(String, f64)> = loads.iter().filter(|(_, l)| *l > mean + margin).collect();
    let mut under: Vec<&(String, f64)> = loads.iter().filter(|(_, l)| *l < mean - margin).collect();
    over.sort_by(|a, b| b.1.total_cmp(&a.1));
    under.sort_by(|a, b| a.1.total_cmp(&b.1));

    over.iter()
        .zip(under.iter())
        .map(|((from, high), (to, low))| Migration {
            from_cluster: from.clone(),
            to_cluster: to.clone(),
            amount: (high - mean).min(mean - low) * fraction,
        })
        .filter(|m| m.amount > 0.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn clusters(loads: &[f64]) -> Vec<FederationCluster> {
        loads
            .iter()
            .enumerate()
            .map(|(i, load)| {
                FederationCluster::new(format!("c{i}"), format!("n{i}"), format!("127.0.0.1:{i}"), "eu")
                    .with_load(*load)
            })
            .collect()
    }

    #[test]
    fn test_least_loaded_picks_lowest_below_threshold() {
        let mut lb = LoadBalancer::new(LoadBalancingStrategy::LeastLoaded, 0.8, 0.1);
        let set = clusters(&[0.5, 0.2, 0.9]);
        assert_eq!(lb.select(&set, OperationKind::Store, None), Some("c1".into()));

        let saturated = clusters(&[0.85, 0.9]);
        assert_eq!(lb.select(&saturated, OperationKind::Store, None), None);
    }

    #[test]
    fn test_least_loaded_tie_goes_to_first_registered() {
        let mut lb = LoadBalancer::new(LoadBalancingStrategy::LeastLoaded, 0.8, 0.1);
        let set = clusters(&[0.3, 0.3, 0.3]);
        assert_eq!(lb.select(&set, OperationKind::Store, None), Some("c0".into()));
    }

    #[test]
    fn test_round_robin_counts_per_kind() {
        let mut lb = LoadBalancer::new(LoadBalancingStrategy::RoundRobin, 0.8, 0.1);
        let set = clusters(&[0.1, 0.1, 0.1]);
        assert_eq!(lb.select(&set, OperationKind::Store, None), Some("c0".into()));
        assert_eq!(lb.select(&set, OperationKind::Store, None), Some("c1".into()));
        assert_eq!(lb.select(&set, OperationKind::Retrieve, None), Some("c0".into()));
        assert_eq!(lb.select(&set, OperationKind::Store, None), Some("c2".into()));
        assert_eq!(lb.select(&set, OperationKind::Store, None), Some("c0".into()));
    }

    #[test]
    fn test_geographic_matches_region_then_falls_back() {
        let mut lb = LoadBalancer::new(LoadBalancingStrategy::Geographic, 0.8, 0.1);
        let mut set = clusters(&[0.1, 0.6, 0.4]);
        set[1].region = "us".into();
        set[2].region = "us".into();
        assert_eq!(lb.select(&set, OperationKind::Store, Some("us")), Some("c2".into()));
        assert_eq!(lb.select(&set, OperationKind::Store, Some("ap")), Some("c0".into()));
        assert_eq!(lb.select(&set, OperationKind::Store, None), Some("c0".into()));
    }

    #[test]
    fn test_adaptive_switches_on_variance() {
        let mut lb = LoadBalancer::new(LoadBalancingStrategy::Adaptive, 0.95, 0.1);
        // Low variance: smart routing, which is least-loaded today.
        let calm = clusters(&[0.4, 0.35, 0.45]);
        assert!(load_variance(&[0.4, 0.35, 0.45]) <= 0.1);
        assert_eq!(lb.select(&calm, OperationKind::Retrieve, None), Some("c1".into()));

        let skewed = clusters(&[0.9, 0.0, 0.9]);
        assert!(load_variance(&[0.9, 0.0, 0.9]) > 0.1);
        assert_eq!(lb.select(&skewed, OperationKind::Store, None), Some("c1".into()));
    }

    #[test]
    fn test_empty_registry_selects_nothing() {
        let mut lb = LoadBalancer::new(LoadBalancingStrategy::RoundRobin, 0.8, 0.1);
        assert_eq!(lb.select(&[], OperationKind::Store, None), None);
    }

    #[test]
    fn test_plan_rebalance_pairs_extremes() {
        let loads = vec![
            ("a".to_string(), 0.2),
            ("b".to_string(), 0.5),
            ("c".to_string(), 0.9),
        ];
        let plan = plan_rebalance(&loads, 0.2, 0.5);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].from_cluster, "c");
        assert_eq!(plan[0].to_cluster, "a");
        let mean = 1.6 / 3.0;
        assert!((plan[0].amount - (mean - 0.2) * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_plan_rebalance_balanced_is_empty() {
        let loads = vec![("a".to_string(), 0.4), ("b".to_string(), 0.5)];
        assert!(plan_rebalance(&loads, 0.2, 0.5).is_empty());
    }

    proptest! {
        #[test]
        fn test_round_robin_is_fair(n in 1usize..8, rounds in 1usize..6) {
            let mut lb = LoadBalancer::new(LoadBalancingStrategy::RoundRobin, 0.8, 0.1);
            let set = clusters(&vec![0.5; n]);
            let mut hits: HashMap<String, usize> = HashMap::new();
            for _ in 0..n * rounds {
                let id = lb.select(&set, OperationKind::Update, None).unwrap();
                *hits.entry(id).or_default() += 1;
            }
            prop_assert_eq!(hits.len(), n);
            prop_assert!(hits.values().all(|count| *count == rounds));
        }

        #[test]
        fn test_rebalance_never_increases_variance(loads in proptest::collection::vec(0.0f64..=1.0, 2..8)) {
            let named: Vec<(String, f64)> = loads
                .iter()
                .enumerate()
                .map(|(i, l)| (format!("c{i}"), *l))
                .collect();
            let before = load_variance(&loads);
            let mut after: HashMap<String, f64> = named.iter().cloned().collect();
            for m in plan_rebalance(&named, 0.2, 0.5) {
                *after.get_mut(&m.from_cluster).unwrap() -= m.amount;
                *after.get_mut(&m.to_cluster).unwrap() += m.amount;
            }
            let after: Vec<f64> = after.into_values().collect();
            prop_assert!(load_variance(&after) <= before + 1e-12);
        }
    }
}
