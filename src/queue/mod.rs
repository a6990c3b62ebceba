//! Task broker adapters and weighted queue selection.
//!
//! Each poll visits the queues in a random order drawn by weight
//! (`critical:6`, `default:3`, `low:1`), so higher-weight queues are
//! usually served first without starving the others.

pub mod memory;
pub mod redis;

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use crate::ports::QueueName;

pub use memory::InMemoryQueue;
pub use redis::RedisQueue;

/// Draws a polling order over all queues, weighted without replacement.
pub fn weighted_order<R: Rng + ?Sized>(rng: &mut R) -> Vec<QueueName> {
    let mut remaining: Vec<QueueName> = QueueName::ALL.to_vec();
    let mut order = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let picked = WeightedIndex::new(remaining.iter().map(|q| q.weight()))
            .map(|dist| dist.sample(rng))
            .unwrap_or(0);
        order.push(remaining.remove(picked));
    }
    order
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn order_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let mut order = weighted_order(&mut rng);
            order.sort_by_key(|q| q.as_str());
            assert_eq!(
                order,
                vec![QueueName::Critical, QueueName::Default, QueueName::Low]
            );
        }
    }

    #[test]
    fn first_pick_follows_weights() {
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 10_000;
        let critical_first = (0..draws)
            .filter(|_| weighted_order(&mut rng).first() == Some(&QueueName::Critical))
            .count();
        let share = critical_first as f64 / f64::from(draws);
        assert!((0.55..0.65).contains(&share), "critical share was {share}");
    }
}
