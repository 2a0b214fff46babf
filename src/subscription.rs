use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::controller::FieldKey;

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SubscriptionKey {
    Form,
    Field(FieldKey),
}

impl SubscriptionKey {
    pub fn field(name: impl Into<FieldKey>) -> Self {
        Self::Field(name.into())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct SubscriberId(u64);

type ListenerFn = Arc<dyn Fn() + Send + Sync>;

type ListenerTable = BTreeMap<SubscriptionKey, Vec<(SubscriberId, ListenerFn)>>;

#[derive(Clone, Default)]
pub(crate) struct SubscriberRegistry {
    next_id: Arc<AtomicU64>,
    listeners: Arc<RwLock<ListenerTable>>,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(
        &self,
        key: SubscriptionKey,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        write_table(&self.listeners)
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            key,
            id,
        }
    }

    pub(crate) fn notify(&self, key: &SubscriptionKey) {
        // Snapshot before invoking: a listener may subscribe or unsubscribe.
        let snapshot: Vec<ListenerFn> = read_table(&self.listeners)
            .get(key)
            .map(|entries| entries.iter().map(|(_, listener)| listener.clone()).collect())
            .unwrap_or_default();
        for listener in snapshot {
            listener();
        }
    }

    pub(crate) fn drop_key(&self, key: &SubscriptionKey) {
        write_table(&self.listeners).remove(key);
    }
}

pub struct Subscription {
    listeners: Weak<RwLock<ListenerTable>>,
    key: SubscriptionKey,
    id: SubscriberId,
}

impl Subscription {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(listeners) = self.listeners.upgrade() else {
            return;
        };
        let mut table = match listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entries) = table.get_mut(&self.key) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                table.remove(&self.key);
            }
        }
    }
}

fn read_table(lock: &RwLock<ListenerTable>) -> RwLockReadGuard<'_, ListenerTable> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_table(lock: &RwLock<ListenerTable>) -> RwLockWriteGuard<'_, ListenerTable> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn listeners_fire_in_registration_order() {
        let registry = SubscriberRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let order = order.clone();
            registry.subscribe(SubscriptionKey::Form, move || {
                order.lock().expect("order lock").push("first");
            })
        };
        let second = {
            let order = order.clone();
            registry.subscribe(SubscriptionKey::Form, move || {
                order.lock().expect("order lock").push("second");
            })
        };

        registry.notify(&SubscriptionKey::Form);
        assert_eq!(*order.lock().expect("order lock"), vec!["first", "second"]);

        drop(first);
        registry.notify(&SubscriptionKey::Form);
        assert_eq!(
            *order.lock().expect("order lock"),
            vec!["first", "second", "second"]
        );
        drop(second);
    }

    #[test]
    fn dropping_the_last_guard_clears_the_key() {
        let registry = SubscriberRegistry::new();
        let guard = registry.subscribe(SubscriptionKey::field("email"), || {});
        drop(guard);
        assert!(
            read_table(&registry.listeners)
                .get(&SubscriptionKey::field("email"))
                .is_none()
        );
    }
}
