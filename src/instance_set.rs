//! C5 — Instance Set (SPEC_FULL.md §3, §4.5).
//!
//! A pure, insertion-order-preserving container keyed by bucket. Built
//! fresh per watcher payload and never mutated after publication.

use crate::instance::ServiceInstance;
use indexmap::IndexMap;

/// One of the four classification outcomes exposed to consumers
/// (SPEC_FULL.md §9 "Variants → tagged union").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Healthy,
    Overloaded,
    OnMaintenance,
    Unhealthy,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::Healthy,
        Bucket::Overloaded,
        Bucket::OnMaintenance,
        Bucket::Unhealthy,
    ];
}

/// Four maps, one per bucket, each an insertion-ordered `key -> instance`.
#[derive(Debug, Clone, Default)]
pub struct InstanceSet {
    healthy: IndexMap<String, ServiceInstance>,
    overloaded: IndexMap<String, ServiceInstance>,
    on_maintenance: IndexMap<String, ServiceInstance>,
    unhealthy: IndexMap<String, ServiceInstance>,
}

impl InstanceSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn map_for(&mut self, bucket: Bucket) -> &mut IndexMap<String, ServiceInstance> {
        match bucket {
            Bucket::Healthy => &mut self.healthy,
            Bucket::Overloaded => &mut self.overloaded,
            Bucket::OnMaintenance => &mut self.on_maintenance,
            Bucket::Unhealthy => &mut self.unhealthy,
        }
    }

    /// Inserts `instance` under its computed key in `bucket`. A duplicate
    /// key within the same snapshot has the later entry win, per
    /// SPEC_FULL.md §4.4 "Tie-breaks". A key only ever lives in one bucket
    /// at a time: inserting into a new bucket removes it from the other
    /// three first, preserving invariant 1 in SPEC_FULL.md §8.
    pub fn add(&mut self, bucket: Bucket, instance: ServiceInstance) {
        let key = instance.key();
        for other in Bucket::ALL {
            if other != bucket {
                self.map_for(other).shift_remove(&key);
            }
        }
        self.map_for(bucket).insert(key, instance);
    }

    /// Instances of `bucket`, in insertion order.
    pub fn get(&self, bucket: Bucket) -> impl Iterator<Item = &ServiceInstance> {
        match bucket {
            Bucket::Healthy => self.healthy.values(),
            Bucket::Overloaded => self.overloaded.values(),
            Bucket::OnMaintenance => self.on_maintenance.values(),
            Bucket::Unhealthy => self.unhealthy.values(),
        }
    }

    pub fn len(&self, bucket: Bucket) -> usize {
        match bucket {
            Bucket::Healthy => self.healthy.len(),
            Bucket::Overloaded => self.overloaded.len(),
            Bucket::OnMaintenance => self.on_maintenance.len(),
            Bucket::Unhealthy => self.unhealthy.len(),
        }
    }

    pub fn total_len(&self) -> usize {
        Bucket::ALL.iter().map(|b| self.len(*b)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Which bucket (if any) holds `key`, for the "at most one bucket"
    /// invariant tests.
    pub fn bucket_of(&self, key: &str) -> Option<Bucket> {
        Bucket::ALL
            .into_iter()
            .find(|bucket| self.map_for_ref(*bucket).contains_key(key))
    }

    fn map_for_ref(&self, bucket: Bucket) -> &IndexMap<String, ServiceInstance> {
        match bucket {
            Bucket::Healthy => &self.healthy,
            Bucket::Overloaded => &self.overloaded,
            Bucket::OnMaintenance => &self.on_maintenance,
            Bucket::Unhealthy => &self.unhealthy,
        }
    }
}
