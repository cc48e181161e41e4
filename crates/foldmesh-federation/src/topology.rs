//! Topology analysis.
//!
//! Produces recommendations from the current load and health distribution.
//! Only `Risk::Low` recommendations are applied by the coordinator; the rest
//! are reported for an operator.

use serde::{Deserialize, Serialize};

use crate::balancer::load_variance;
use crate::registry::FederationCluster;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Risk {
    Low,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Rebalance { variance: f64 },
    IsolateCluster { cluster_id: String, health_score: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: Action,
    pub risk: Risk,
    pub reason: String,
}

impl Recommendation {
    pub fn is_low_risk(&self) -> bool {
        self.risk == Risk::Low
    }
}

pub fn analyze(clusters: &[FederationCluster], variance_threshold: f64, isolation_threshold: f64) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    let loads: Vec<f64> = clusters.iter().map(|c| c.load_factor).collect();
    let variance = load_variance(&loads);
    if variance > variance_threshold {
        recommendations.push(Recommendation {
            action: Action::Rebalance { variance },
            risk: Risk::Low,
            reason: format!("load variance {variance:.3} exceeds {variance_threshold:.3}"),
        });
    }

    for cluster in clusters.iter().filter(|c| c.health_score < isolation_threshold) {
        recommendations.push(Recommendation {
            action: Action::IsolateCluster {
                cluster_id: cluster.cluster_id.clone(),
                health_score: cluster.health_score,
            },
            risk: Risk::High,
            reason: format!(
                "cluster {} health {:.2} below {:.2}",
                cluster.cluster_id, cluster.health_score, isolation_threshold
            ),
        });
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(id: &str, load: f64, health: f64) -> FederationCluster {
        let mut c = FederationCluster::new(id, "n", "127.0.0.1:1", "eu").with_load(load);
        c.health_score = health;
        c
    }

    #[test]
    fn test_balanced_healthy_federation_needs_nothing() {
        let set = vec![cluster("a", 0.4, 0.9), cluster("b", 0.5, 0.8)];
        assert!(analyze(&set, 0.1, 0.3).is_empty());
    }

    #[test]
    fn test_skew_and_sick_cluster() {
        let set = vec![cluster("a", 0.0, 0.9), cluster("b", 1.0, 0.1)];
        let recs = analyze(&set, 0.1, 0.3);
        assert_eq!(recs.len(), 2);
        assert!(recs[0].is_low_risk());
        assert!(matches!(recs[0].action, Action::Rebalance { .. }));
        assert_eq!(recs[1].risk, Risk::High);
        assert_eq!(
            recs[1].action,
            Action::IsolateCluster { cluster_id: "b".into(), health_score: 0.1 }
        );
    }
}
