use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::models::TrendSnapshot;

type CacheKey = (String, NaiveDate);

struct Entry {
    snapshot: TrendSnapshot,
    inserted_at: Instant,
}

/// Read-mostly snapshot cache shared across requests. Concurrent writers for
/// one key race; the last insert wins.
pub struct SnapshotCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    ttl: Duration,
    capacity: usize,
}

impl SnapshotCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, region_key: &str, as_of: NaiveDate) -> Option<TrendSnapshot> {
        let entries = self.entries.read();
        let entry = entries.get(&(region_key.to_string(), as_of))?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.snapshot.clone())
    }

    pub fn insert(&self, snapshot: TrendSnapshot) {
        let key = (snapshot.region_key.clone(), snapshot.as_of_date);
        let mut entries = self.entries.write();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.inserted_at.elapsed() <= ttl);

            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            Entry {
                snapshot,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classification;

    fn snapshot(region: &str, day: u32) -> TrendSnapshot {
        TrendSnapshot {
            region_key: region.to_string(),
            as_of_date: NaiveDate::from_ymd_opt(2026, 4, day).unwrap(),
            seven_day_avg: 12.0,
            prior_seven_day_avg: 10.0,
            growth_rate: 0.2,
            classification: Classification::ModerateGrowth,
            outbreak_probability: 70,
            estimated: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = SnapshotCache::new(Duration::from_secs(900), 8);
        let snap = snapshot("Texas", 2);
        cache.insert(snap.clone());
        assert_eq!(cache.get("Texas", snap.as_of_date), Some(snap.clone()));

        tokio::time::advance(Duration::from_secs(901)).await;
        assert_eq!(cache.get("Texas", snap.as_of_date), None);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_oldest() {
        let cache = SnapshotCache::new(Duration::from_secs(900), 2);
        cache.insert(snapshot("Texas", 1));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(snapshot("Texas", 2));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(snapshot("Texas", 3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("Texas", NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()).is_none());
        assert!(cache.get("Texas", NaiveDate::from_ymd_opt(2026, 4, 3).unwrap()).is_some());
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let cache = SnapshotCache::new(Duration::from_secs(900), 4);
        let first = snapshot("Ohio", 5);
        let mut second = first.clone();
        second.seven_day_avg = 99.0;
        cache.insert(first.clone());
        cache.insert(second.clone());
        assert_eq!(cache.get("Ohio", first.as_of_date), Some(second));
        assert_eq!(cache.len(), 1);
    }
}
