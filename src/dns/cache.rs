//! A fixed-size, open-addressed TTL cache sitting in front of a slower
//! resolver. SPF policies change slowly and error results should not be
//! re-probed for every message, so entries are cached past their DNS TTL up
//! to a configurable floor per answer kind.
//!
//! Two tables back this: a primary table of `2^k` slots and a smaller
//! "reclaim" table of `2^max(k-3, 1)` slots that a live entry is demoted
//! into when something else claims its primary slot, instead of being
//! dropped outright. A lookup that misses the primary slot still checks the
//! reclaim slot, promoting the survivor back to primary, before falling
//! through to the layer below.
//!
//! The tables live behind a `Mutex` so `CacheResolver` can implement
//! `Resolver` (a shared-reference trait) directly and be handed around the
//! same way every other link in the chain is, as an `Arc<dyn Resolver>`
//! shared by every request the server processes.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::dns::rr::{DnsStatus, RecordType, ResourceRecord};
use crate::dns::Resolver;
use crate::error::SpfResult;

/// TTL floors applied on cache insertion. A record's own TTL is clamped up
/// (never down) to the matching floor.
#[derive(Debug, Clone, Copy)]
pub struct TtlFloors {
    /// Applied to every successful answer regardless of kind.
    pub min_ttl: Duration,
    /// Applied to `HostNotFound`/`NoData`/`TryAgain` answers.
    pub error_ttl: Duration,
    /// Applied to TXT answers specifically (SPF policies move rarely).
    pub txt_ttl: Duration,
    /// Applied when the query domain ends in `.arpa` (PTR lookups).
    pub arpa_ttl: Duration,
}

impl Default for TtlFloors {
    fn default() -> Self {
        Self {
            min_ttl: Duration::from_secs(30),
            error_ttl: Duration::from_secs(30),
            txt_ttl: Duration::from_secs(120),
            arpa_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Primary table holds `2^k` slots, `k` in `[1, 16]`.
    pub k: u8,
    pub floors: TtlFloors,
    /// When set, lookups marked non-cacheable by the caller bypass the
    /// cache-write path entirely (they may still be served by a prior hit).
    pub conserve_cache: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            k: 8,
            floors: TtlFloors::default(),
            conserve_cache: true,
        }
    }
}

#[derive(Clone)]
struct Slot {
    key: (String, RecordType),
    value: ResourceRecord,
    expires_at: Instant,
}

fn type_tag(rtype: RecordType) -> u32 {
    match rtype {
        RecordType::A => 0,
        RecordType::Aaaa => 1,
        RecordType::Mx => 2,
        RecordType::Txt => 3,
        RecordType::Ptr => 4,
        RecordType::Any => 5,
    }
}

/// Mixes the query type and a CRC-32 of the domain (dots stripped, bounded
/// to `max(2k, 8)` input characters) into one 32-bit hash.
fn hash_key(domain: &str, rtype: RecordType, k: u8) -> u32 {
    let limit = std::cmp::max(2 * k as usize, 8);
    let filtered: String = domain.chars().filter(|c| *c != '.').take(limit).collect();
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(filtered.to_ascii_lowercase().as_bytes());
    let crc = hasher.finalize();
    crc ^ type_tag(rtype).wrapping_mul(0x9E37_79B1)
}

fn normalize(domain: &str) -> String {
    domain.trim_end_matches('.').to_ascii_lowercase()
}

struct Tables {
    primary: Vec<Option<Slot>>,
    reclaim: Vec<Option<Slot>>,
}

impl Tables {
    fn primary_index(&self, hash: u32) -> usize {
        (hash as usize) & (self.primary.len() - 1)
    }

    fn reclaim_index(&self, hash: u32) -> usize {
        (hash as usize) & (self.reclaim.len() - 1)
    }

    fn insert(&mut self, key: (String, RecordType), hash: u32, value: ResourceRecord, ttl: Duration) {
        let idx = self.primary_index(hash);
        let slot = Slot {
            key,
            value,
            expires_at: Instant::now() + ttl,
        };
        if let Some(displaced) = self.primary[idx].replace(slot) {
            if displaced.expires_at > Instant::now() {
                let r_idx = self.reclaim_index(hash);
                self.reclaim[r_idx] = Some(displaced);
            }
        }
    }

    fn get(&mut self, key_domain: &str, rtype: RecordType, hash: u32) -> Option<ResourceRecord> {
        let now = Instant::now();
        let p_idx = self.primary_index(hash);
        if let Some(slot) = &self.primary[p_idx] {
            if slot.key.0 == key_domain && slot.key.1 == rtype && slot.expires_at >= now {
                return Some(slot.value.clone());
            }
        }

        let r_idx = self.reclaim_index(hash);
        if let Some(slot) = &self.reclaim[r_idx] {
            if slot.key.0 == key_domain && slot.key.1 == rtype && slot.expires_at >= now {
                let promoted = slot.clone();
                self.reclaim[r_idx] = None;
                if let Some(displaced) = self.primary[p_idx].replace(promoted.clone()) {
                    if displaced.expires_at > now {
                        self.reclaim[r_idx] = Some(displaced);
                    }
                }
                return Some(promoted.value);
            }
        }

        None
    }
}

pub struct CacheResolver<D: Resolver> {
    config: CacheConfig,
    tables: Mutex<Tables>,
    layer_below: D,
}

impl<D: Resolver> CacheResolver<D> {
    pub fn new(config: CacheConfig, layer_below: D) -> Self {
        let k = config.k.clamp(1, 16);
        let reclaim_k = std::cmp::max(k.saturating_sub(3), 1);
        Self {
            config: CacheConfig { k, ..config },
            tables: Mutex::new(Tables {
                primary: vec![None; 1usize << k],
                reclaim: vec![None; 1usize << reclaim_k],
            }),
            layer_below,
        }
    }

    fn floor_for(&self, domain: &str, rtype: RecordType, status: DnsStatus) -> Duration {
        if domain.ends_with(".arpa") {
            return self.config.floors.arpa_ttl;
        }
        if !status.is_success() {
            return self.config.floors.error_ttl;
        }
        if rtype == RecordType::Txt {
            return self.config.floors.txt_ttl;
        }
        self.config.floors.min_ttl
    }

    #[cfg(test)]
    fn contains(&self, domain: &str, rtype: RecordType) -> bool {
        let key_domain = normalize(domain);
        let hash = hash_key(&key_domain, rtype, self.config.k);
        let mut tables = self.tables.lock().unwrap();
        tables.get(&key_domain, rtype, hash).is_some()
    }
}

impl<D: Resolver> Resolver for CacheResolver<D> {
    fn lookup(&self, domain: &str, rtype: RecordType, cacheable: bool) -> SpfResult<ResourceRecord> {
        let key_domain = normalize(domain);
        let hash = hash_key(&key_domain, rtype, self.config.k);

        if let Some(hit) = self.tables.lock().unwrap().get(&key_domain, rtype, hash) {
            log::debug!("cache hit for {key_domain} {rtype:?}");
            return Ok(hit);
        }
        log::debug!("cache miss for {key_domain} {rtype:?}, delegating");

        let answer = self.layer_below.lookup(domain, rtype, cacheable)?;
        if cacheable || !self.config.conserve_cache {
            let floor = self.floor_for(&key_domain, rtype, answer.status);
            let ttl = std::cmp::max(answer.ttl, floor);
            self.tables
                .lock()
                .unwrap()
                .insert((key_domain, rtype), hash, answer.clone(), ttl);
        } else {
            log::debug!("{key_domain} {rtype:?} marked non-cacheable, skipping cache write");
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::zone::ZoneResolver;

    #[test]
    fn caches_a_hit_past_the_underlying_ttl() {
        let mut zone = ZoneResolver::new();
        zone.set_txt("example.com", "v=spf1 -all");
        let cache = CacheResolver::new(CacheConfig::default(), zone);

        let first = cache.lookup("example.com", RecordType::Txt, true).unwrap();
        assert_eq!(first.status, DnsStatus::Success);
        assert!(cache.contains("example.com", RecordType::Txt));
    }

    #[test]
    fn second_lookup_is_served_from_cache() {
        let zone = ZoneResolver::new();
        let cache = CacheResolver::new(CacheConfig::default(), zone);
        let first = cache.lookup("nx.example", RecordType::A, true).unwrap();
        assert_eq!(first.status, DnsStatus::HostNotFound);
        let second = cache.lookup("nx.example", RecordType::A, true).unwrap();
        assert_eq!(second.status, DnsStatus::HostNotFound);
    }

    #[test]
    fn non_cacheable_lookup_with_conserve_cache_skips_write() {
        let mut zone = ZoneResolver::new();
        zone.set_txt("example.com", "v=spf1 -all");
        let config = CacheConfig {
            conserve_cache: true,
            ..CacheConfig::default()
        };
        let cache = CacheResolver::new(config, zone);

        cache.lookup("example.com", RecordType::Txt, false).unwrap();
        assert!(!cache.contains("example.com", RecordType::Txt));
    }

    #[test]
    fn displaced_live_entry_is_demoted_to_reclaim_not_dropped() {
        let mut zone = ZoneResolver::new();
        zone.set_txt("a.example", "v=spf1 -all");
        zone.set_txt("b.example", "v=spf1 ~all");
        let cache = CacheResolver::new(CacheConfig { k: 1, ..CacheConfig::default() }, zone);

        cache.lookup("a.example", RecordType::Txt, true).unwrap();
        cache.lookup("b.example", RecordType::Txt, true).unwrap();

        // with only 2 primary slots, both keys might collide or not; either
        // way the answer should still be servable without hitting the zone.
        let a = cache.lookup("a.example", RecordType::Txt, true).unwrap();
        assert_eq!(a.status, DnsStatus::Success);
    }
}
