#[cfg(test)]
mod tests {
    use crate::*;
    use crossbeam::channel;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn change(ids: &[&str]) -> DatabaseChange {
        DatabaseChange {
            database: "db".to_string(),
            document_ids: ids.iter().map(|id| id.to_string()).collect(),
            sequence: 1,
        }
    }

    fn scopes(subs: &[Arc<data::Subscription>]) -> Vec<ListenerScope> {
        subs.iter().map(|s| s.scope()).collect()
    }

    #[test]
    fn test_lookup_matches_scope_in_registration_order() {
        let registry = ListenerRegistry::new();
        registry.register(Listener::document("a", |_| {}), Delivery::Synchronous);
        registry.register(Listener::database(|_| {}), Delivery::Synchronous);
        registry.register(Listener::document("b", |_| {}), Delivery::Synchronous);
        registry.register(Listener::document("a", |_| {}), Delivery::Synchronous);

        let found = registry.lookup(&change(&["a"]));
        assert_eq!(
            scopes(&found),
            vec![
                ListenerScope::Document("a".to_string()),
                ListenerScope::AllDocuments,
                ListenerScope::Document("a".to_string()),
            ]
        );

        // Stable across repeated lookups
        let again = registry.lookup(&change(&["a"]));
        let orders: Vec<u64> = found.iter().map(|s| s.order()).collect();
        let again_orders: Vec<u64> = again.iter().map(|s| s.order()).collect();
        assert_eq!(orders, again_orders);

        let found = registry.lookup(&change(&["c"]));
        assert_eq!(scopes(&found), vec![ListenerScope::AllDocuments]);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ListenerRegistry::new();
        let token = registry.register(Listener::database(|_| {}), Delivery::Synchronous);
        let other = registry.register(Listener::database(|_| {}), Delivery::Synchronous);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&token));

        assert!(registry.unregister(&token));
        assert!(!registry.unregister(&token));
        assert!(!registry.contains(&token));
        assert!(registry.contains(&other));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_tokens_are_unique() {
        let registry = ListenerRegistry::new();
        let first = registry.register(Listener::database(|_| {}), Delivery::Synchronous);
        let second = registry.register(Listener::database(|_| {}), Delivery::Synchronous);
        assert_ne!(first, second);
        assert_ne!(first.as_uuid(), second.as_uuid());
    }

    #[test]
    fn test_snapshot_excludes_later_registrations() {
        let registry = ListenerRegistry::new();
        registry.register(Listener::database(|_| {}), Delivery::Synchronous);

        let snapshot = registry.lookup(&change(&["a"]));
        registry.register(Listener::database(|_| {}), Delivery::Synchronous);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.lookup(&change(&["a"])).len(), 2);
    }

    #[test]
    fn test_removed_subscription_is_skipped() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let token = registry.register(
            Listener::database(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
            Delivery::Synchronous,
        );

        let snapshot = registry.lookup(&change(&["a"]));
        registry.unregister(&token);

        assert_eq!(snapshot[0].state(), SubscriptionState::Removed);
        let invocation = snapshot[0].invoke(|listener| {
            if let Listener::Database(callback) = listener {
                callback(&change(&["a"]));
            }
        });
        assert_eq!(invocation, Invocation::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_invocation_is_contained() {
        let registry = ListenerRegistry::new();
        registry.register(Listener::database(|_| panic!("boom")), Delivery::Synchronous);

        let snapshot = registry.lookup(&change(&["a"]));
        let invocation = snapshot[0].invoke(|listener| {
            if let Listener::Database(callback) = listener {
                callback(&change(&["a"]));
            }
        });

        assert_eq!(invocation, Invocation::Failed("boom".to_string()));
        assert!(snapshot[0].is_active());
    }

    #[test]
    fn test_unregister_waits_for_running_callback() {
        let registry = ListenerRegistry::new();
        let (started_tx, started_rx) = channel::bounded(1);
        let finished = Arc::new(AtomicBool::new(false));
        let finished_clone = finished.clone();

        let token = registry.register(
            Listener::database(move |_| {
                started_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(200));
                finished_clone.store(true, Ordering::SeqCst);
            }),
            Delivery::Synchronous,
        );

        let snapshot = registry.lookup(&change(&["a"]));
        let worker = thread::spawn(move || {
            snapshot[0].invoke(|listener| {
                if let Listener::Database(callback) = listener {
                    callback(&change(&["a"]));
                }
            })
        });

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(registry.unregister(&token));
        // The in-flight call completed before unregister returned
        assert!(finished.load(Ordering::SeqCst));

        assert_eq!(worker.join().unwrap(), Invocation::Delivered);
    }

    fn start_slow_invocation(
        registry: &Arc<ListenerRegistry>,
    ) -> (ListenerToken, Arc<AtomicBool>, thread::JoinHandle<Invocation>) {
        let (started_tx, started_rx) = channel::bounded(1);
        let finished = Arc::new(AtomicBool::new(false));
        let finished_clone = finished.clone();

        let token = registry.register(
            Listener::database(move |_| {
                started_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(300));
                finished_clone.store(true, Ordering::SeqCst);
            }),
            Delivery::Synchronous,
        );

        let snapshot = registry.lookup(&change(&["a"]));
        let worker = thread::spawn(move || {
            snapshot[0].invoke(|listener| {
                if let Listener::Database(callback) = listener {
                    callback(&change(&["a"]));
                }
            })
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        (token, finished, worker)
    }

    #[test]
    fn test_every_concurrent_unregister_waits() {
        let registry = ListenerRegistry::new();
        let (token, finished, worker) = start_slow_invocation(&registry);
        let token = Arc::new(token);

        let removers: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                let token = token.clone();
                let finished = finished.clone();
                thread::spawn(move || {
                    let removed = registry.unregister(&token);
                    (removed, finished.load(Ordering::SeqCst))
                })
            })
            .collect();

        let results: Vec<(bool, bool)> = removers.into_iter().map(|h| h.join().unwrap()).collect();
        // Exactly one caller removed the entry, and neither returned early
        assert_eq!(results.iter().filter(|(removed, _)| *removed).count(), 1);
        assert!(results.iter().all(|(_, done)| *done));
        assert_eq!(worker.join().unwrap(), Invocation::Delivered);
    }

    #[test]
    fn test_unregister_racing_clear_waits() {
        let registry = ListenerRegistry::new();
        let (token, finished, worker) = start_slow_invocation(&registry);

        let clearer = {
            let registry = registry.clone();
            thread::spawn(move || registry.clear())
        };
        // Whether or not clear got there first, this returns after the callback
        registry.unregister(&token);
        assert!(finished.load(Ordering::SeqCst));

        assert!(clearer.join().unwrap() <= 1);
        assert_eq!(worker.join().unwrap(), Invocation::Delivered);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closed_registry_ignores_registration() {
        let registry = ListenerRegistry::new();
        registry.register(Listener::database(|_| {}), Delivery::Synchronous);
        assert_eq!(registry.close(), 1);
        assert!(registry.is_closed());

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let token = registry.register(
            Listener::database(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
            Delivery::Synchronous,
        );

        assert!(registry.is_empty());
        assert!(!registry.contains(&token));
        assert!(registry.lookup(&change(&["a"])).is_empty());
        assert!(!registry.unregister(&token));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_can_remove_its_own_token() {
        let db = Database::open("self-remove", DatabaseConfig::synchronous()).unwrap();
        let db = Arc::new(db);
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<std::sync::Mutex<Option<ListenerToken>>> = Arc::new(std::sync::Mutex::new(None));

        let calls_clone = calls.clone();
        let slot_clone = slot.clone();
        let token = db.add_change_listener(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = slot_clone.lock().unwrap().as_ref() {
                token.remove();
            }
        });
        *slot.lock().unwrap() = Some(token);

        let mut doc = db.create_document("doc1");
        db.save(&mut doc).unwrap();
        db.save(&mut doc).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(db.listener_count(), 0);
    }

    #[test]
    fn test_clear_removes_everything() {
        let registry = ListenerRegistry::new();
        let token = registry.register(Listener::database(|_| {}), Delivery::Synchronous);
        registry.register(Listener::document("a", |_| {}), Delivery::Synchronous);

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert!(!registry.unregister(&token));
    }
}
