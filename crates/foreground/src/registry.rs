// Registry of live foreground instances, kept in insertion order.
//
// Entries are keyed by `InstanceId` and hold only a weak back-reference, so
// the registry never keeps a torn-down instance alive. Every scan snapshots
// under the lock and releases it before calling into instances, because
// termination routinely re-enters the registry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::correlation::Token;
use crate::instance::{Instance, InstanceId, InstanceKind};

struct Entry {
    id: InstanceId,
    kind: InstanceKind,
    handle: Weak<dyn Instance>,
}

impl Entry {
    fn is_dead(&self) -> bool {
        self.handle.strong_count() == 0
    }
}

#[derive(Default)]
struct Entries {
    list: Vec<Entry>,
    /// Bulk terminations currently walking a taken snapshot.
    walks: usize,
    /// Ids removed (and not pushed again) while a walk held them outside
    /// `list`. Cleared when the last walk writes back.
    removed_during_walk: HashSet<InstanceId>,
}

#[derive(Default)]
pub struct InstanceRegistry {
    entries: Mutex<Entries>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `instance` unless its identity is already present.
    pub fn push(&self, instance: Arc<dyn Instance>) {
        let id = instance.id();
        let kind = instance.kind();
        let handle = Arc::downgrade(&instance);
        {
            let mut entries = self.lock();
            entries.removed_during_walk.remove(&id);
            if entries.list.iter().any(|e| e.id == id) {
                return;
            }
            entries.list.push(Entry { id, kind, handle });
        }
        tracing::debug!(%id, kind = kind.name(), "instance pushed");
    }

    /// Remove by identity. No-op if absent.
    pub fn remove(&self, id: InstanceId) {
        let removed = {
            let mut entries = self.lock();
            if entries.walks > 0 {
                entries.removed_during_walk.insert(id);
            }
            let before = entries.list.len();
            entries.list.retain(|e| e.id != id);
            entries.list.len() != before
        };
        if removed {
            tracing::debug!(%id, "instance removed");
        }
    }

    pub fn remove_all(&self, ids: impl IntoIterator<Item = InstanceId>) {
        for id in ids {
            self.remove(id);
        }
    }

    /// The most recently pushed instance that is still alive.
    ///
    /// Returns `None` when the registry is empty. Trailing entries whose
    /// instance has already been dropped are pruned on the way.
    pub fn current(&self) -> Option<Arc<dyn Instance>> {
        let mut entries = self.lock();
        loop {
            let entry = entries.list.last()?;
            match entry.handle.upgrade() {
                Some(instance) => return Some(instance),
                None => {
                    if let Some(dead) = entries.list.pop() {
                        tracing::warn!(id = %dead.id, kind = dead.kind.name(), "pruned dropped instance from registry");
                    }
                }
            }
        }
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.lock().list.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().list.is_empty()
    }

    /// Live instances in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<dyn Instance>> {
        let handles: Vec<Weak<dyn Instance>> =
            self.lock().list.iter().map(|e| e.handle.clone()).collect();
        handles.iter().filter_map(Weak::upgrade).collect()
    }

    /// True if any live, not-yet-terminated instance is one of `kinds`.
    pub fn exists_of_type(&self, kinds: &[InstanceKind]) -> bool {
        self.snapshot()
            .iter()
            .any(|i| i.kind().is_any_of(kinds) && !i.is_terminated())
    }

    /// The live instance currently serving `token`, if any.
    pub fn find_by_token(&self, token: Token) -> Option<Arc<dyn Instance>> {
        self.snapshot()
            .into_iter()
            .find(|i| i.correlation_token() == Some(token))
    }

    /// Remove `instance`, then ask it to terminate unless it already has.
    ///
    /// Removal comes first so a re-entrant termination callback never sees a
    /// stale entry.
    pub fn terminate(&self, instance: &dyn Instance) {
        self.remove(instance.id());
        if !instance.is_terminated() {
            instance.request_termination();
        }
    }

    /// Terminate every instance whose kind is one of `kinds`. Returns how many
    /// instances were asked to terminate.
    pub fn terminate_of_type(&self, kinds: &[InstanceKind]) -> usize {
        self.terminate_where(|kind| kind.is_any_of(kinds))
    }

    /// Terminate every instance whose kind is not one of `kinds`. Returns how
    /// many instances were asked to terminate.
    pub fn terminate_all_except_type(&self, kinds: &[InstanceKind]) -> usize {
        self.terminate_where(|kind| !kind.is_any_of(kinds))
    }

    pub fn terminate_all(&self) -> usize {
        self.terminate_where(|_| true)
    }

    /// Snapshot, clear, terminate matches with the lock released, then write
    /// the skipped entries back ahead of anything pushed during the walk.
    /// Skipped entries removed during the walk stay removed.
    fn terminate_where(&self, should_terminate: impl Fn(InstanceKind) -> bool) -> usize {
        let snapshot = {
            let mut entries = self.lock();
            entries.walks += 1;
            std::mem::take(&mut entries.list)
        };
        let mut kept = Vec::with_capacity(snapshot.len());
        let mut terminated = 0;

        for entry in snapshot {
            if entry.is_dead() {
                tracing::warn!(id = %entry.id, kind = entry.kind.name(), "dropped instance found during bulk terminate");
                continue;
            }
            if !should_terminate(entry.kind) {
                kept.push(entry);
                continue;
            }
            if let Some(instance) = entry.handle.upgrade() {
                if !instance.is_terminated() {
                    instance.request_termination();
                    terminated += 1;
                }
            }
        }

        {
            let mut entries = self.lock();
            kept.retain(|e| !entries.removed_during_walk.contains(&e.id));
            let pushed_meanwhile = std::mem::replace(&mut entries.list, kept);
            for entry in pushed_meanwhile {
                if !entries.list.iter().any(|e| e.id == entry.id) {
                    entries.list.push(entry);
                }
            }
            entries.walks -= 1;
            if entries.walks == 0 {
                entries.removed_during_walk.clear();
            }
        }

        tracing::debug!(terminated, "bulk terminate finished");
        terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Dialog;
    struct Screen;

    struct Window {
        id: InstanceId,
        kind: InstanceKind,
        terminated: AtomicBool,
        termination_requests: AtomicUsize,
        // When set, termination removes the window from this registry, the way
        // a real teardown notification would.
        registry: Option<Arc<InstanceRegistry>>,
    }

    impl Window {
        fn new(kind: InstanceKind) -> Arc<Self> {
            Arc::new(Self {
                id: InstanceId::next(),
                kind,
                terminated: AtomicBool::new(false),
                termination_requests: AtomicUsize::new(0),
                registry: None,
            })
        }

        fn reentrant(kind: InstanceKind, registry: &Arc<InstanceRegistry>) -> Arc<Self> {
            Arc::new(Self {
                id: InstanceId::next(),
                kind,
                terminated: AtomicBool::new(false),
                termination_requests: AtomicUsize::new(0),
                registry: Some(registry.clone()),
            })
        }

        fn requests(&self) -> usize {
            self.termination_requests.load(Ordering::SeqCst)
        }
    }

    impl Instance for Window {
        fn id(&self) -> InstanceId {
            self.id
        }

        fn kind(&self) -> InstanceKind {
            self.kind
        }

        fn is_terminated(&self) -> bool {
            self.terminated.load(Ordering::SeqCst)
        }

        fn request_termination(&self) {
            self.termination_requests.fetch_add(1, Ordering::SeqCst);
            self.terminated.store(true, Ordering::SeqCst);
            if let Some(registry) = &self.registry {
                assert!(!registry.contains(self.id), "stale entry during termination");
                registry.remove(self.id);
            }
        }
    }

    fn dialog() -> InstanceKind {
        InstanceKind::of::<Dialog>()
    }

    fn screen() -> InstanceKind {
        InstanceKind::of::<Screen>()
    }

    fn ids(registry: &InstanceRegistry) -> Vec<InstanceId> {
        registry.snapshot().iter().map(|i| i.id()).collect()
    }

    #[test]
    fn push_is_idempotent() {
        let registry = InstanceRegistry::new();
        let a = Window::new(screen());
        registry.push(a.clone());
        registry.push(a.clone());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn current_is_last_pushed_still_present() {
        let registry = InstanceRegistry::new();
        assert!(registry.current().is_none());

        let a = Window::new(screen());
        let b = Window::new(dialog());
        registry.push(a.clone());
        registry.push(b.clone());
        assert_eq!(registry.current().map(|i| i.id()), Some(b.id));

        registry.remove(b.id);
        assert_eq!(registry.current().map(|i| i.id()), Some(a.id));

        registry.remove(a.id);
        assert!(registry.current().is_none());
    }

    #[test]
    fn remove_unknown_is_noop() {
        let registry = InstanceRegistry::new();
        let a = Window::new(screen());
        registry.push(a.clone());
        registry.remove(InstanceId::next());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_all_removes_each() {
        let registry = InstanceRegistry::new();
        let a = Window::new(screen());
        let b = Window::new(screen());
        let c = Window::new(dialog());
        for p in [&a, &b, &c] {
            registry.push(p.clone());
        }
        registry.remove_all([a.id, c.id]);
        assert_eq!(ids(&registry), vec![b.id]);
    }

    #[test]
    fn current_prunes_dropped_instances() {
        let registry = InstanceRegistry::new();
        let a = Window::new(screen());
        registry.push(a.clone());
        {
            let b = Window::new(dialog());
            registry.push(b.clone());
        }
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.current().map(|i| i.id()), Some(a.id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn exists_of_type_ignores_terminated() {
        let registry = InstanceRegistry::new();
        let d = Window::new(dialog());
        registry.push(d.clone());
        assert!(registry.exists_of_type(&[dialog()]));
        assert!(!registry.exists_of_type(&[screen()]));

        d.terminated.store(true, Ordering::SeqCst);
        assert!(!registry.exists_of_type(&[dialog()]));
    }

    #[test]
    fn terminate_removes_before_requesting() {
        let registry = Arc::new(InstanceRegistry::new());
        let a = Window::reentrant(screen(), &registry);
        registry.push(a.clone());

        registry.terminate(a.as_ref());
        assert_eq!(a.requests(), 1);
        assert!(registry.is_empty());

        // Already terminated: not asked again.
        registry.push(a.clone());
        registry.terminate(a.as_ref());
        assert_eq!(a.requests(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn terminate_of_type_partitions() {
        let registry = Arc::new(InstanceRegistry::new());
        let s1 = Window::reentrant(screen(), &registry);
        let d1 = Window::reentrant(dialog(), &registry);
        let s2 = Window::reentrant(screen(), &registry);
        let d2 = Window::reentrant(dialog(), &registry);
        for p in [&s1, &d1, &s2, &d2] {
            registry.push(p.clone());
        }

        assert_eq!(registry.terminate_of_type(&[dialog()]), 2);
        assert_eq!(ids(&registry), vec![s1.id, s2.id]);
        assert_eq!(d1.requests(), 1);
        assert_eq!(d2.requests(), 1);
        assert_eq!(s1.requests(), 0);
    }

    #[test]
    fn terminate_all_except_type_partitions() {
        let registry = Arc::new(InstanceRegistry::new());
        let d1 = Window::reentrant(dialog(), &registry);
        let s1 = Window::reentrant(screen(), &registry);
        let d2 = Window::reentrant(dialog(), &registry);
        for p in [&d1, &s1, &d2] {
            registry.push(p.clone());
        }

        assert_eq!(registry.terminate_all_except_type(&[dialog()]), 1);
        assert_eq!(ids(&registry), vec![d1.id, d2.id]);
        assert_eq!(s1.requests(), 1);
    }

    #[test]
    fn terminate_all_empties_registry() {
        let registry = Arc::new(InstanceRegistry::new());
        let windows: Vec<_> = (0..5).map(|_| Window::reentrant(screen(), &registry)).collect();
        for p in &windows {
            registry.push(p.clone());
        }
        assert_eq!(registry.terminate_all(), 5);
        assert!(registry.is_empty());
        assert!(windows.iter().all(|p| p.requests() == 1));
    }

    #[test]
    fn bulk_terminate_drops_dead_entries() {
        let registry = InstanceRegistry::new();
        let s = Window::new(screen());
        registry.push(s.clone());
        registry.push(Window::new(dialog()));

        assert_eq!(registry.terminate_of_type(&[dialog()]), 0);
        assert_eq!(ids(&registry), vec![s.id]);
        assert_eq!(registry.len(), 1);
    }

    struct Spawner {
        id: InstanceId,
        registry: Arc<InstanceRegistry>,
        replacement: Arc<Window>,
        terminated: AtomicBool,
    }

    impl Instance for Spawner {
        fn id(&self) -> InstanceId {
            self.id
        }

        fn kind(&self) -> InstanceKind {
            dialog()
        }

        fn is_terminated(&self) -> bool {
            self.terminated.load(Ordering::SeqCst)
        }

        fn request_termination(&self) {
            self.terminated.store(true, Ordering::SeqCst);
            self.registry.push(self.replacement.clone());
        }
    }

    #[test]
    fn instances_pushed_during_bulk_terminate_survive() {
        let registry = Arc::new(InstanceRegistry::new());
        let s = Window::new(screen());
        let replacement = Window::new(screen());
        let spawner = Arc::new(Spawner {
            id: InstanceId::next(),
            registry: registry.clone(),
            replacement: replacement.clone(),
            terminated: AtomicBool::new(false),
        });
        registry.push(s.clone());
        registry.push(spawner.clone());

        registry.terminate_of_type(&[dialog()]);
        assert_eq!(ids(&registry), vec![s.id, replacement.id]);
    }

    /// Dialog whose termination dismisses another instance.
    struct Dismisser {
        id: InstanceId,
        registry: Arc<InstanceRegistry>,
        dismisses: InstanceId,
        terminated: AtomicBool,
    }

    impl Instance for Dismisser {
        fn id(&self) -> InstanceId {
            self.id
        }

        fn kind(&self) -> InstanceKind {
            dialog()
        }

        fn is_terminated(&self) -> bool {
            self.terminated.load(Ordering::SeqCst)
        }

        fn request_termination(&self) {
            self.terminated.store(true, Ordering::SeqCst);
            self.registry.remove(self.dismisses);
        }
    }

    #[test]
    fn removal_of_skipped_instance_during_bulk_terminate_sticks() {
        let registry = Arc::new(InstanceRegistry::new());
        let parent = Window::new(screen());
        let other = Window::new(screen());
        let dismisser = Arc::new(Dismisser {
            id: InstanceId::next(),
            registry: registry.clone(),
            dismisses: parent.id,
            terminated: AtomicBool::new(false),
        });
        registry.push(parent.clone());
        registry.push(other.clone());
        registry.push(dismisser.clone());

        assert_eq!(registry.terminate_of_type(&[dialog()]), 1);
        assert!(!registry.contains(parent.id));
        assert_eq!(ids(&registry), vec![other.id]);
        assert_eq!(registry.current().map(|i| i.id()), Some(other.id));

        // A later push of the same identity is honoured again.
        registry.push(parent.clone());
        assert_eq!(ids(&registry), vec![other.id, parent.id]);
    }

    #[test]
    fn bulk_terminate_counts_only_requested_terminations() {
        let registry = Arc::new(InstanceRegistry::new());
        let done = Window::new(dialog());
        done.terminated.store(true, Ordering::SeqCst);
        let live = Window::new(dialog());
        registry.push(done.clone());
        registry.push(live.clone());

        assert_eq!(registry.terminate_of_type(&[dialog()]), 1);
        assert_eq!(done.requests(), 0);
        assert_eq!(live.requests(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn bulk_terminate_from_worker_while_registry_mutates() {
        const CHURN_ROUNDS: usize = 500;
        const DIALOGS: usize = 200;

        let registry = Arc::new(InstanceRegistry::new());
        let stable: Vec<_> = (0..4).map(|_| Window::new(screen())).collect();
        for p in &stable {
            registry.push(p.clone());
        }
        let churn: Vec<_> = (0..8).map(|_| Window::new(screen())).collect();
        let running = Arc::new(AtomicBool::new(true));

        let churner = {
            let registry = registry.clone();
            let churn = churn.clone();
            std::thread::spawn(move || {
                for _ in 0..CHURN_ROUNDS {
                    for p in &churn {
                        registry.push(p.clone());
                    }
                    for p in &churn {
                        registry.remove(p.id);
                    }
                }
            })
        };
        let opener = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                (0..DIALOGS)
                    .map(|_| {
                        let d = Window::new(dialog());
                        registry.push(d.clone());
                        d
                    })
                    .collect::<Vec<_>>()
            })
        };
        let terminator = {
            let registry = registry.clone();
            let running = running.clone();
            std::thread::spawn(move || {
                let mut terminated = 0;
                let mut round = 0;
                while running.load(Ordering::SeqCst) {
                    terminated += if round % 2 == 0 {
                        registry.terminate_of_type(&[dialog()])
                    } else {
                        registry.terminate_all_except_type(&[screen()])
                    };
                    round += 1;
                }
                terminated
            })
        };

        churner.join().unwrap();
        let dialogs = opener.join().unwrap();
        running.store(false, Ordering::SeqCst);
        let mut terminated = terminator.join().unwrap();
        terminated += registry.terminate_of_type(&[dialog()]);

        // Every dialog asked exactly once; every screen left alone.
        assert_eq!(terminated, DIALOGS);
        assert!(dialogs.iter().all(|d| d.requests() == 1));
        assert!(stable.iter().chain(&churn).all(|p| p.requests() == 0));

        // Only the stable screens remain: nothing removed came back.
        let mut remaining = ids(&registry);
        remaining.sort();
        let mut expected: Vec<_> = stable.iter().map(|p| p.id).collect();
        expected.sort();
        assert_eq!(remaining, expected);
    }

    #[test]
    fn concurrent_push_remove_keeps_identities_unique() {
        let registry = Arc::new(InstanceRegistry::new());
        let windows: Vec<_> = (0..32).map(|_| Window::new(screen())).collect();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let registry = registry.clone();
                let windows = windows.clone();
                std::thread::spawn(move || {
                    for round in 0..200 {
                        for (i, p) in windows.iter().enumerate() {
                            if (i + round + t) % 3 == 0 {
                                registry.remove(p.id);
                            } else {
                                registry.push(p.clone());
                            }
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = ids(&registry);
        let total = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), total);
    }
}
