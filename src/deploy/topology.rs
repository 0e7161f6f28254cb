use crate::types::{Replica, Shard};

/// Replicas per shard when replication is enabled
pub const REPLICAS_PER_SHARD: usize = 2;

/// Map an ordered host list to shards.
///
/// Without replication every host is its own shard. With replication hosts
/// are paired in input order; the caller guarantees an even count.
pub fn build_shards(hosts: &[String], replicated: bool) -> Vec<Shard> {
    let width = if replicated { REPLICAS_PER_SHARD } else { 1 };
    hosts
        .chunks_exact(width)
        .map(|chunk| Shard {
            replicas: chunk
                .iter()
                .map(|ip| Replica { ip: ip.clone(), hostname: String::new() })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn ips(shards: &[Shard]) -> Vec<Vec<&str>> {
        shards
            .iter()
            .map(|s| s.replicas.iter().map(|r| r.ip.as_str()).collect())
            .collect()
    }

    #[test]
    fn test_single_replica_shards() {
        let shards = build_shards(&hosts(&["h1", "h2", "h3", "h4"]), false);
        assert_eq!(ips(&shards), vec![vec!["h1"], vec!["h2"], vec!["h3"], vec!["h4"]]);
    }

    #[test]
    fn test_replicated_pairs() {
        let shards = build_shards(&hosts(&["h1", "h2", "h3", "h4"]), true);
        assert_eq!(ips(&shards), vec![vec!["h1", "h2"], vec!["h3", "h4"]]);
    }

    #[test]
    fn test_empty_input() {
        assert!(build_shards(&[], true).is_empty());
        assert!(build_shards(&[], false).is_empty());
    }
}
