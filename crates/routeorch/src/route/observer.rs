//! Next-hop change notifications.
//!
//! Observers watch one destination address in one VRF. For each watched
//! destination the registry keeps the routes covering it, so the longest
//! match is always the last entry, and pushes an update whenever that
//! entry changes.

use log::{debug, info, warn};
use sonic_sai::VirtualRouterOid;
use sonic_types::{IpAddress, IpPrefix};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::nhg::NextHopGroupKey;
use super::types::RouteTable;

/// The route now used to reach a watched destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextHopUpdate {
    pub vrf_id: VirtualRouterOid,
    pub destination: IpAddress,
    pub prefix: IpPrefix,
    pub nexthop_group: NextHopGroupKey,
}

/// Receives next-hop changes for a destination.
pub trait NextHopObserver: Send + Sync {
    fn update(&self, update: &NextHopUpdate);
}

#[derive(Default)]
struct ObserverEntry {
    routes: BTreeMap<IpPrefix, NextHopGroupKey>,
    observers: Vec<Arc<dyn NextHopObserver>>,
}

impl ObserverEntry {
    fn longest_match(&self) -> Option<(&IpPrefix, &NextHopGroupKey)> {
        self.routes.iter().next_back()
    }

    fn deliver(&self, update: &NextHopUpdate) {
        for observer in &self.observers {
            observer.update(update);
        }
    }
}

/// Watched destinations keyed by (VRF, destination).
#[derive(Default)]
pub struct NextHopObserverRegistry {
    entries: BTreeMap<(VirtualRouterOid, IpAddress), ObserverEntry>,
}

impl NextHopObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts watching `destination`. The first observer of a destination
    /// builds its covering table from `routes`. Returns true if an update
    /// was delivered right away.
    pub fn attach(
        &mut self,
        observer: Arc<dyn NextHopObserver>,
        vrf_id: VirtualRouterOid,
        destination: IpAddress,
        routes: Option<&RouteTable>,
    ) -> bool {
        let entry = self.entries.entry((vrf_id, destination)).or_insert_with(|| {
            let mut entry = ObserverEntry::default();
            for (prefix, nhg) in routes.into_iter().flatten() {
                if prefix.contains(&destination) {
                    debug!("RouteOrch: prefix {} covers destination {}", prefix, destination);
                    entry.routes.insert(*prefix, nhg.nhg_key.clone());
                }
            }
            entry
        });

        entry.observers.push(Arc::clone(&observer));

        match entry.longest_match() {
            Some((prefix, nhg)) => {
                info!(
                    "RouteOrch: attached next hop observer of route {} for destination {}",
                    prefix, destination
                );
                observer.update(&NextHopUpdate {
                    vrf_id,
                    destination,
                    prefix: *prefix,
                    nexthop_group: nhg.clone(),
                });
                true
            }
            None => false,
        }
    }

    /// Stops one observer. The destination is forgotten with its last
    /// observer.
    pub fn detach(
        &mut self,
        observer: &Arc<dyn NextHopObserver>,
        vrf_id: VirtualRouterOid,
        destination: &IpAddress,
    ) -> bool {
        let key = (vrf_id, *destination);
        let Some(entry) = self.entries.get_mut(&key) else {
            warn!("RouteOrch: no observer for destination {}", destination);
            return false;
        };
        let Some(pos) = entry.observers.iter().position(|o| Arc::ptr_eq(o, observer)) else {
            return false;
        };
        entry.observers.remove(pos);
        info!("RouteOrch: detached next hop observer for destination {}", destination);
        if entry.observers.is_empty() {
            self.entries.remove(&key);
        }
        true
    }

    /// Applies a route change to every watched destination it covers.
    pub fn notify(
        &mut self,
        vrf_id: VirtualRouterOid,
        prefix: &IpPrefix,
        nexthops: &NextHopGroupKey,
        is_add: bool,
    ) {
        for ((entry_vrf, destination), entry) in self.entries.iter_mut() {
            if *entry_vrf != vrf_id || !prefix.contains(destination) {
                continue;
            }

            let update = if is_add {
                Self::route_added(entry, prefix, nexthops)
            } else {
                Self::route_removed(entry, prefix)
            };

            if let Some((prefix, nexthop_group)) = update {
                entry.deliver(&NextHopUpdate {
                    vrf_id,
                    destination: *destination,
                    prefix,
                    nexthop_group,
                });
            }
        }
    }

    fn route_added(
        entry: &mut ObserverEntry,
        prefix: &IpPrefix,
        nexthops: &NextHopGroupKey,
    ) -> Option<(IpPrefix, NextHopGroupKey)> {
        match entry.routes.get_mut(prefix) {
            None => {
                let is_best = entry.longest_match().map_or(true, |(best, _)| best < prefix);
                entry.routes.insert(*prefix, nexthops.clone());
                is_best.then(|| (*prefix, nexthops.clone()))
            }
            Some(current) if current != nexthops => {
                *current = nexthops.clone();
                let is_best = entry.longest_match().is_some_and(|(best, _)| best == prefix);
                is_best.then(|| (*prefix, nexthops.clone()))
            }
            Some(_) => None,
        }
    }

    fn route_removed(entry: &mut ObserverEntry, prefix: &IpPrefix) -> Option<(IpPrefix, NextHopGroupKey)> {
        let was_best = entry.longest_match().is_some_and(|(best, _)| best == prefix);
        entry.routes.remove(prefix)?;
        if !was_best {
            return None;
        }
        entry
            .longest_match()
            .map(|(best, nhg)| (*best, nhg.clone()))
    }

    /// Number of watched destinations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::types::RouteNhg;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<NextHopUpdate>>,
    }

    impl NextHopObserver for Recorder {
        fn update(&self, update: &NextHopUpdate) {
            self.updates.lock().push(update.clone());
        }
    }

    impl Recorder {
        fn prefixes(&self) -> Vec<String> {
            self.updates.lock().iter().map(|u| u.prefix.to_string()).collect()
        }
    }

    fn vrf() -> VirtualRouterOid {
        VirtualRouterOid::from_raw_unchecked(0x3000000000001)
    }

    fn nhg(s: &str) -> NextHopGroupKey {
        s.parse().unwrap()
    }

    fn table() -> RouteTable {
        let mut table = RouteTable::new();
        table.insert(IpPrefix::DEFAULT_V4, RouteNhg::default());
        table.insert("10.0.0.0/8".parse().unwrap(), RouteNhg::new(nhg("1.1.1.1@Ethernet0")));
        table.insert("20.0.0.0/8".parse().unwrap(), RouteNhg::new(nhg("2.2.2.2@Ethernet4")));
        table
    }

    #[test]
    fn test_attach_delivers_longest_match() {
        let mut registry = NextHopObserverRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let table = table();

        assert!(registry.attach(recorder.clone(), vrf(), "10.1.1.1".parse().unwrap(), Some(&table)));
        assert_eq!(recorder.prefixes(), vec!["10.0.0.0/8"]);

        let other = Arc::new(Recorder::default());
        assert!(registry.attach(other.clone(), vrf(), "10.1.1.1".parse().unwrap(), None));
        assert_eq!(other.prefixes(), vec!["10.0.0.0/8"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_attach_without_routes() {
        let mut registry = NextHopObserverRegistry::new();
        let recorder = Arc::new(Recorder::default());
        assert!(!registry.attach(recorder.clone(), vrf(), "10.1.1.1".parse().unwrap(), None));
        assert!(recorder.prefixes().is_empty());
    }

    #[test]
    fn test_notify_only_on_longest_match_change() {
        let mut registry = NextHopObserverRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let table = table();
        registry.attach(recorder.clone(), vrf(), "10.1.1.1".parse().unwrap(), Some(&table));

        // Longer prefix wins.
        registry.notify(vrf(), &"10.1.0.0/16".parse().unwrap(), &nhg("3.3.3.3@Ethernet8"), true);
        // Shorter prefix does not.
        registry.notify(vrf(), &"10.0.0.0/7".parse().unwrap(), &nhg("4.4.4.4@Ethernet8"), true);
        // Does not cover the destination.
        registry.notify(vrf(), &"20.1.0.0/16".parse().unwrap(), &nhg("4.4.4.4@Ethernet8"), true);
        // Same next hops: no change.
        registry.notify(vrf(), &"10.1.0.0/16".parse().unwrap(), &nhg("3.3.3.3@Ethernet8"), true);
        // Changed next hops on the best match.
        registry.notify(vrf(), &"10.1.0.0/16".parse().unwrap(), &nhg("5.5.5.5@Ethernet8"), true);
        // Removing a non-best route is silent; removing the best falls back.
        registry.notify(vrf(), &"10.0.0.0/7".parse().unwrap(), &NextHopGroupKey::new(), false);
        registry.notify(vrf(), &"10.1.0.0/16".parse().unwrap(), &NextHopGroupKey::new(), false);

        assert_eq!(
            recorder.prefixes(),
            vec!["10.0.0.0/8", "10.1.0.0/16", "10.1.0.0/16", "10.0.0.0/8"]
        );
        let updates = recorder.updates.lock();
        assert_eq!(updates[2].nexthop_group, nhg("5.5.5.5@Ethernet8"));
        assert_eq!(updates[3].nexthop_group, nhg("1.1.1.1@Ethernet0"));
    }

    #[test]
    fn test_notify_ignores_other_vrf() {
        let mut registry = NextHopObserverRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let table = table();
        registry.attach(recorder.clone(), vrf(), "10.1.1.1".parse().unwrap(), Some(&table));

        let other_vrf = VirtualRouterOid::from_raw_unchecked(0x3000000000009);
        registry.notify(other_vrf, &"10.1.0.0/16".parse().unwrap(), &nhg("3.3.3.3@Ethernet8"), true);
        assert_eq!(recorder.prefixes().len(), 1);
    }

    #[test]
    fn test_detach_drops_entry_with_last_observer() {
        let mut registry = NextHopObserverRegistry::new();
        let first: Arc<dyn NextHopObserver> = Arc::new(Recorder::default());
        let second: Arc<dyn NextHopObserver> = Arc::new(Recorder::default());
        let dst: IpAddress = "10.1.1.1".parse().unwrap();

        registry.attach(first.clone(), vrf(), dst, None);
        registry.attach(second.clone(), vrf(), dst, None);

        assert!(registry.detach(&first, vrf(), &dst));
        assert!(!registry.detach(&first, vrf(), &dst));
        assert_eq!(registry.len(), 1);
        assert!(registry.detach(&second, vrf(), &dst));
        assert!(registry.is_empty());
    }
}
