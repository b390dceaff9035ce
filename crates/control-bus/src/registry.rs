//! Handler registry keyed by declared kind name.
//!
//! Dispatch resolves a concrete kind to every registration on that kind or
//! any ancestor. Both the ancestor closure and the resolved list are
//! memoized per concrete kind; the resolved list is invalidated by a
//! generation counter bumped on every registry change.

use crate::event::EventDescriptor;
use crate::handler::{same_handler, EventHandler};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// One handler bound under its declared kind.
pub(crate) struct Registration {
    handler: Arc<dyn EventHandler>,
    active: AtomicBool,
}

impl Registration {
    pub(crate) fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.handler
    }

    /// Cleared by `unregister`; pooled invocations check it before running.
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

type Resolved = Arc<[Arc<Registration>]>;

pub(crate) struct HandlerRegistry {
    by_kind: RwLock<HashMap<String, Vec<Arc<Registration>>>>,
    generation: AtomicU64,
    ancestry: DashMap<&'static str, Arc<[&'static str]>>,
    resolved: DashMap<&'static str, (u64, Resolved)>,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            by_kind: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ancestry: DashMap::new(),
            resolved: DashMap::new(),
        }
    }

    pub(crate) fn register(&self, handler: Arc<dyn EventHandler>) {
        let registration = Arc::new(Registration {
            handler,
            active: AtomicBool::new(true),
        });
        let mut by_kind = self.by_kind.write();
        by_kind
            .entry(registration.handler.kind().to_string())
            .or_default()
            .push(registration);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Remove every registration of `handler`. Returns how many were removed.
    pub(crate) fn unregister(&self, handler: &Arc<dyn EventHandler>) -> usize {
        let mut by_kind = self.by_kind.write();
        let Some(registrations) = by_kind.get_mut(handler.kind()) else {
            return 0;
        };

        let before = registrations.len();
        registrations.retain(|registration| {
            if same_handler(&registration.handler, handler) {
                registration.active.store(false, Ordering::Release);
                false
            } else {
                true
            }
        });
        let removed = before - registrations.len();

        if registrations.is_empty() {
            by_kind.remove(handler.kind());
        }
        if removed > 0 {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    /// Registrations whose declared kind is `descriptor` or an ancestor.
    pub(crate) fn resolve(&self, descriptor: &'static EventDescriptor) -> Resolved {
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(hit) = self.resolved.get(descriptor.name()) {
            if hit.0 == generation {
                return Arc::clone(&hit.1);
            }
        }

        let ancestry = self.ancestry(descriptor);
        let resolved: Resolved = {
            let by_kind = self.by_kind.read();
            ancestry
                .iter()
                .filter_map(|name| by_kind.get(*name))
                .flatten()
                .cloned()
                .collect()
        };

        self.resolved
            .insert(descriptor.name(), (generation, Arc::clone(&resolved)));
        resolved
    }

    fn ancestry(&self, descriptor: &'static EventDescriptor) -> Arc<[&'static str]> {
        if let Some(cached) = self.ancestry.get(descriptor.name()) {
            return Arc::clone(cached.value());
        }
        let closure: Arc<[&'static str]> = descriptor.ancestors().into();
        self.ancestry
            .insert(descriptor.name(), Arc::clone(&closure));
        closure
    }

    /// Distinct declared kinds with at least one non-local registration.
    pub(crate) fn remote_kinds(&self) -> Vec<String> {
        self.by_kind
            .read()
            .iter()
            .filter(|(_, registrations)| {
                registrations
                    .iter()
                    .any(|registration| !registration.handler.local_only())
            })
            .map(|(kind, _)| kind.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_kind.read().values().map(Vec::len).sum()
    }
}
