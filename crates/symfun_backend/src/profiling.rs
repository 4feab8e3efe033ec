use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeProfile {
    pub op: String,
    pub calls: u64,
    pub time: Duration,
}

/// Timing collected for one compiled function.  Node entries are keyed by node id and
/// accumulate across calls.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileStats {
    pub compile_time: Duration,
    pub rewrite_time: Duration,
    pub link_time: Duration,
    pub call_count: u64,
    pub call_time: Duration,
    pub nodes: BTreeMap<usize, NodeProfile>,
}

impl ProfileStats {
    pub fn record_node(&mut self, node: usize, op: &str, time: Duration) {
        let entry = self.nodes.entry(node).or_insert_with(|| NodeProfile {
            op: op.to_owned(),
            ..Default::default()
        });
        entry.calls += 1;
        entry.time += time;
    }

    pub fn record_call(&mut self, time: Duration) {
        self.call_count += 1;
        self.call_time += time;
    }

    pub fn node_time(&self) -> Duration {
        self.nodes.values().map(|node| node.time).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accumulates_and_serializes() {
        let mut stats = ProfileStats::default();
        stats.record_node(3, "add", Duration::from_micros(5));
        stats.record_node(3, "add", Duration::from_micros(7));
        stats.record_call(Duration::from_micros(20));

        assert_eq!(stats.nodes[&3].calls, 2);
        assert_eq!(stats.node_time(), Duration::from_micros(12));

        let json = serde_json::to_string(&stats).unwrap();
        let back: ProfileStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}
