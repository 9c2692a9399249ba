#[cfg(test)]
mod tests {
    use crate::*;
    use std::sync::{Arc, Mutex};

    // Synchronous delivery so every assertion can run right after the write
    fn create_test_database() -> (Database, Arc<Mutex<Vec<DatabaseChange>>>) {
        let db = Database::open("batch-test", DatabaseConfig::synchronous()).unwrap();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let changes_clone = changes.clone();
        db.add_change_listener(move |change| {
            changes_clone.lock().unwrap().push(change.clone());
        });
        (db, changes)
    }

    #[test]
    fn test_batch_of_n_writes_emits_one_change() -> Result<()> {
        for n in [1usize, 2, 7, 25] {
            let (db, changes) = create_test_database();

            db.in_batch(|batch| {
                for i in 0..n {
                    let mut doc = Document::new(format!("doc-{}", i));
                    batch.save(&mut doc)?;
                }
                Ok(())
            })?;

            let changes = changes.lock().unwrap();
            assert_eq!(changes.len(), 1, "n = {}", n);
            assert_eq!(changes[0].document_ids.len(), n);
            assert_eq!(db.count(), n);
        }
        Ok(())
    }

    #[test]
    fn test_aborted_batch_emits_nothing() -> Result<()> {
        let (db, changes) = create_test_database();
        let doc_changes = Arc::new(Mutex::new(Vec::new()));
        let doc_changes_clone = doc_changes.clone();
        db.add_document_change_listener("doc-0", move |change| {
            doc_changes_clone.lock().unwrap().push(change.clone());
        });

        let result: Result<()> = db.in_batch(|batch| {
            for i in 0..5 {
                let mut doc = Document::new(format!("doc-{}", i));
                batch.save(&mut doc)?;
            }
            batch.abort("changed my mind")
        });

        assert_eq!(
            result.unwrap_err(),
            Error::Write(WriteError::Aborted("changed my mind".to_string()))
        );
        assert!(changes.lock().unwrap().is_empty());
        assert!(doc_changes.lock().unwrap().is_empty());
        assert_eq!(db.count(), 0);
        assert_eq!(db.last_sequence(), 0);
        Ok(())
    }

    #[test]
    fn test_failed_write_rolls_back_batch() -> Result<()> {
        let (db, changes) = create_test_database();

        let result = db.in_batch(|batch| {
            let mut doc = Document::new("doc1");
            batch.save(&mut doc)?;
            batch.delete(&Document::new("missing"))
        });

        assert_eq!(
            result.unwrap_err().write_error(),
            Some(&WriteError::NotFound("missing".to_string()))
        );
        assert!(db.document("doc1").is_none());
        assert!(changes.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn test_panicking_batch_rolls_back() {
        let (db, changes) = create_test_database();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            db.in_batch(|batch| -> Result<()> {
                let mut doc = Document::new("doc1");
                batch.save(&mut doc)?;
                panic!("body failed")
            })
        }));
        assert!(outcome.is_err());

        assert!(db.document("doc1").is_none());
        assert!(changes.lock().unwrap().is_empty());

        // The database is still usable
        let mut doc = Document::new("doc2");
        db.save(&mut doc).unwrap();
        assert_eq!(changes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_batch_coalesces_repeated_writes() -> Result<()> {
        let (db, changes) = create_test_database();
        let mut existing = Document::new("existing");
        db.save(&mut existing)?;
        let reborn = Document::new("reborn");
        db.save(&mut reborn.clone())?;
        changes.lock().unwrap().clear();

        let kinds = Arc::new(Mutex::new(Vec::new()));
        for id in ["fresh", "existing", "temp", "reborn"] {
            let kinds = kinds.clone();
            db.add_document_change_listener(id, move |change| {
                kinds.lock().unwrap().push((change.document_id.clone(), change.kind));
            });
        }

        db.in_batch(|batch| {
            let mut fresh = Document::new("fresh");
            batch.save(&mut fresh)?;
            fresh.set_value("step", 2);
            batch.save(&mut fresh)?;

            existing.set_value("step", 1);
            batch.save(&mut existing)?;
            existing.set_value("step", 2);
            batch.save(&mut existing)?;

            let mut temp = Document::new("temp");
            batch.save(&mut temp)?;
            batch.delete(&temp)?;

            // Deleted and written again: the document outlives the batch
            let stored = batch.document("reborn").unwrap();
            batch.delete(&stored)?;
            let mut replacement = Document::new("reborn");
            replacement.set_value("step", 1);
            batch.save(&mut replacement)?;
            Ok(())
        })?;

        let changes = changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].document_ids, vec!["fresh", "existing", "temp", "reborn"]);

        let kinds = kinds.lock().unwrap();
        assert_eq!(
            *kinds,
            vec![
                ("fresh".to_string(), ChangeKind::Created),
                ("existing".to_string(), ChangeKind::Updated),
                ("temp".to_string(), ChangeKind::Deleted),
                ("reborn".to_string(), ChangeKind::Updated),
            ]
        );
        assert!(db.document("temp").is_none());
        assert_eq!(db.document("reborn").unwrap().value("step"), Some(&serde_json::json!(1)));
        assert_eq!(db.document("fresh").unwrap().value("step"), Some(&serde_json::json!(2)));
        Ok(())
    }

    #[test]
    fn test_remove_listener_inside_batch_while_it_writes() -> Result<()> {
        let db = Arc::new(Database::open("remove-in-batch", DatabaseConfig::default())?);
        let (started_tx, started_rx) = crossbeam::channel::bounded(1);
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let weak = Arc::downgrade(&db);
        let finished_clone = finished.clone();
        let token = db.add_document_change_listener("a", move |_| {
            started_tx.send(()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(100));
            if let Some(db) = weak.upgrade() {
                db.save(&mut Document::new("b")).unwrap();
            }
            finished_clone.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        db.save(&mut Document::new("a"))?;
        started_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();

        let (done_tx, done_rx) = crossbeam::channel::bounded(1);
        let db_clone = db.clone();
        let finished_clone = finished.clone();
        std::thread::spawn(move || {
            let result = db_clone.in_batch(|batch| {
                db_clone.remove_change_listener(&token);
                batch.save(&mut Document::new("c"))
            });
            // The in-flight callback has completed by the time the batch returns
            let _ = done_tx.send((result, finished_clone.load(std::sync::atomic::Ordering::SeqCst)));
        });

        let (result, callback_done) = done_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("batch finished");
        result?;
        assert!(callback_done);
        assert!(db.document("b").is_some());
        assert!(db.document("c").is_some());
        assert_eq!(db.listener_count(), 0);
        Ok(())
    }

    #[test]
    fn test_batch_sees_its_own_writes() -> Result<()> {
        let (db, _changes) = create_test_database();

        let seen = db.in_batch(|batch| {
            let mut doc = Document::new("doc1");
            doc.set_value("name", "Scott");
            batch.save(&mut doc)?;
            assert_eq!(batch.mutation_count(), 1);
            Ok(batch.document("doc1"))
        })?;

        assert_eq!(seen.unwrap().string("name"), Some("Scott"));
        assert_eq!(db.document("doc1").unwrap().string("name"), Some("Scott"));
        Ok(())
    }

    #[test]
    fn test_empty_batch_emits_nothing() -> Result<()> {
        let (db, changes) = create_test_database();
        let value = db.in_batch(|_| Ok(42))?;
        assert_eq!(value, 42);
        assert!(changes.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn test_sequences_increase_across_commits() -> Result<()> {
        let (db, changes) = create_test_database();

        db.in_batch(|batch| {
            batch.save(&mut Document::new("a"))?;
            batch.save(&mut Document::new("b"))
        })?;
        db.save(&mut Document::new("c"))?;

        let changes = changes.lock().unwrap();
        assert_eq!(changes[0].sequence, 2);
        assert_eq!(changes[1].sequence, 3);

        let entries = db.changes_since(0);
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(db.changes_since(2).len(), 1);
        Ok(())
    }
}
