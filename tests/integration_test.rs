use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use anyhow::Result;
use heapdb::access::{Field, Tuple, TupleDesc, Type};
use heapdb::catalog::TableId;
use heapdb::concurrency::{LockManager, LockMode};
use heapdb::database::{Database, DatabaseConfig};
use heapdb::storage::buffer::Permissions;
use heapdb::storage::page::{HeapPage, PageId};
use heapdb::storage::StorageError;
use heapdb::transaction::TransactionId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

fn open_db(dir: &Path, pool_pages: usize) -> Result<(Database, TableId)> {
    let mut config = DatabaseConfig::for_testing(dir);
    config.buffer_pool_pages = pool_pages;
    let db = Database::open(config)?;
    let table = db.add_table(
        "people",
        &dir.join("people.dat"),
        TupleDesc::new(
            vec![Type::Int, Type::String],
            vec![Some("id".to_string()), Some("name".to_string())],
        ),
    )?;
    Ok((db, table))
}

fn person(db: &Database, table: TableId, id: i32, name: &str) -> Result<Tuple> {
    Ok(Tuple::new(
        db.catalog().tuple_desc(table)?,
        vec![Field::Int(id), Field::from(name)],
    )?)
}

/// Ids of every tuple in the table, in scan order.
fn scan_ids(db: &Database, table: TableId) -> Result<Vec<i32>> {
    let txn = db.begin()?;
    let file = db.catalog().database_file(table)?;
    let mut ids = Vec::new();
    for tuple in file.iterator(txn.id(), Arc::clone(db.pool())) {
        if let Some(Field::Int(id)) = tuple?.field(0) {
            ids.push(*id);
        }
    }
    txn.commit()?;
    Ok(ids)
}

#[test]
fn test_shared_then_exclusive_waits_for_release() {
    let locks = LockManager::new();
    let page = PageId::new(1, 0);
    let t1 = TransactionId::new(1);
    let t2 = TransactionId::new(2);

    assert!(locks.acquire(t1, page, LockMode::Shared));
    assert!(!locks.acquire(t2, page, LockMode::Exclusive));
    assert_eq!(locks.waiting_on(t2), Some(page));

    locks.release(t1, page);
    assert!(locks.acquire(t2, page, LockMode::Exclusive));
    assert_eq!(locks.waiting_on(t2), None);
    assert_eq!(locks.lock_mode(t2, page), Some(LockMode::Exclusive));
}

#[test]
fn test_committed_inserts_are_scanned_in_order() -> Result<()> {
    let dir = tempdir()?;
    let (db, table) = open_db(dir.path(), 1)?;

    let t1 = db.begin()?;
    for (id, name) in [(1, "ada"), (2, "grace"), (3, "edsger")] {
        let mut tuple = person(&db, table, id, name)?;
        db.pool().insert_tuple(t1.id(), table, &mut tuple)?;
    }
    t1.commit()?;

    let t2 = db.begin()?;
    let file = db.catalog().database_file(table)?;
    let names: Vec<String> = file
        .iterator(t2.id(), Arc::clone(t2.pool()))
        .map(|t| t.map(|t| t.fields()[1].to_string()))
        .collect::<Result<_, _>>()?;
    assert_eq!(names, vec!["ada", "grace", "edsger"]);
    assert_eq!(file.num_pages()?, 1);
    t2.commit()?;
    Ok(())
}

#[test]
fn test_abort_restores_pre_image_on_disk() -> Result<()> {
    let dir = tempdir()?;
    let (db, table) = open_db(dir.path(), 10)?;

    let setup = db.begin()?;
    db.pool()
        .insert_tuple(setup.id(), table, &mut person(&db, table, 1, "kept")?)?;
    setup.commit()?;

    let pid = PageId::new(table, 0);
    let file = db.catalog().database_file(table)?;
    let pre_image = file.read_page(pid)?.to_bytes();

    let t1 = db.begin()?;
    db.pool()
        .insert_tuple(t1.id(), table, &mut person(&db, table, 2, "dropped")?)?;
    // Push the uncommitted page to disk so the abort has to undo it
    db.pool().flush_all_pages()?;
    assert_ne!(file.read_page(pid)?.to_bytes(), pre_image);

    t1.abort()?;
    assert_eq!(file.read_page(pid)?.to_bytes(), pre_image);
    assert_eq!(scan_ids(&db, table)?, vec![1]);
    Ok(())
}

#[test]
fn test_dropped_transaction_is_aborted() -> Result<()> {
    let dir = tempdir()?;
    let (db, table) = open_db(dir.path(), 10)?;
    {
        let txn = db.begin()?;
        db.pool()
            .insert_tuple(txn.id(), table, &mut person(&db, table, 1, "gone")?)?;
    }
    assert!(scan_ids(&db, table)?.is_empty());
    Ok(())
}

#[test]
fn test_capacity_exhausted_then_recovers_after_commit() -> Result<()> {
    let dir = tempdir()?;
    let (db, table) = open_db(dir.path(), 1)?;
    let file = db.catalog().database_file(table)?;
    for p in 0..2 {
        file.write_page_bytes(p, &HeapPage::empty_page_data(file.page_size()))?;
    }

    let txn = db.begin()?;
    db.pool()
        .insert_tuple(txn.id(), table, &mut person(&db, table, 1, "x")?)?;
    let err = db
        .pool()
        .get_page(txn.id(), PageId::new(table, 1), Permissions::ReadOnly)
        .unwrap_err();
    assert!(matches!(err, StorageError::CapacityExhausted { capacity: 1 }));
    assert!(err.is_recoverable());
    // The cache is unchanged and the transaction still usable
    assert!(db.pool().is_cached(PageId::new(table, 0)));
    txn.commit()?;

    let txn = db.begin()?;
    db.pool()
        .get_page(txn.id(), PageId::new(table, 1), Permissions::ReadOnly)?;
    txn.commit()?;
    Ok(())
}

#[test]
fn test_crash_after_commit_record_is_redone() -> Result<()> {
    let dir = tempdir()?;
    {
        let (db, table) = open_db(dir.path(), 10)?;
        let file = db.catalog().database_file(table)?;
        file.write_page_bytes(0, &HeapPage::empty_page_data(file.page_size()))?;

        let desc = db.catalog().tuple_desc(table)?;
        let page_size = file.page_size();
        let pid = PageId::new(table, 0);
        let empty = HeapPage::empty_page_data(page_size);
        let before = HeapPage::new(pid, &empty, Arc::clone(&desc), page_size)?;
        let mut after = HeapPage::new(pid, &empty, Arc::clone(&desc), page_size)?;
        after.insert_tuple(&mut person(&db, table, 7, "logged")?)?;

        let tid = TransactionId::new(1);
        db.log().log_begin(tid)?;
        db.log().log_write(tid, before.image(), after.image())?;
        db.log().log_commit(tid)?;
        // Crash: the page itself was never written
    }

    let (db, table) = open_db(dir.path(), 10)?;
    let stats = db.recover()?;
    assert_eq!(stats.committed, 1);
    assert_eq!(scan_ids(&db, table)?, vec![7]);
    Ok(())
}

#[test]
fn test_checkpoint_then_crash() -> Result<()> {
    let dir = tempdir()?;
    let scratch_path = dir.path().join("scratch.dat");
    let scratch_desc = TupleDesc::from_types(vec![Type::Int]);
    {
        let (db, table) = open_db(dir.path(), 10)?;
        let scratch = db.add_table("scratch", &scratch_path, scratch_desc.clone())?;

        let a = db.begin()?;
        db.pool()
            .insert_tuple(a.id(), table, &mut person(&db, table, 1, "a")?)?;
        a.commit()?;

        let open = db.begin()?;
        let scratch_desc = db.catalog().tuple_desc(scratch)?;
        let mut pending = Tuple::new(scratch_desc, vec![Field::Int(2)])?;
        db.pool().insert_tuple(open.id(), scratch, &mut pending)?;
        db.checkpoint()?;

        let b = db.begin()?;
        db.pool()
            .insert_tuple(b.id(), table, &mut person(&db, table, 3, "b")?)?;
        b.commit()?;
        std::mem::forget(open);
    }

    let (db, table) = open_db(dir.path(), 10)?;
    let scratch = db.add_table("scratch", &scratch_path, scratch_desc)?;
    let stats = db.recover()?;
    assert_eq!(stats.rolled_back, 1);
    assert_eq!(scan_ids(&db, table)?, vec![1, 3]);
    assert!(scan_ids(&db, scratch)?.is_empty());
    Ok(())
}

#[test]
fn test_random_workload_survives_crash() -> Result<()> {
    let dir = tempdir()?;
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut committed: Vec<Tuple> = Vec::new();
    let mut next_id = 0;

    {
        let (db, table) = open_db(dir.path(), 20)?;

        for round in 0..40 {
            let txn = db.begin()?;
            let mut inserted = Vec::new();
            let mut deleted = Vec::new();

            for _ in 0..rng.gen_range(1..20) {
                if !committed.is_empty() && rng.gen_bool(0.3) {
                    let victim = rng.gen_range(0..committed.len());
                    if deleted.contains(&victim) {
                        continue;
                    }
                    db.pool().delete_tuple(txn.id(), &committed[victim])?;
                    deleted.push(victim);
                } else {
                    let mut tuple = person(&db, table, next_id, "row")?;
                    next_id += 1;
                    db.pool().insert_tuple(txn.id(), table, &mut tuple)?;
                    inserted.push(tuple);
                }
            }

            if rng.gen_bool(0.2) {
                db.pool().flush_all_pages()?;
            }

            if rng.gen_bool(0.7) {
                txn.commit()?;
                deleted.sort_unstable();
                for victim in deleted.into_iter().rev() {
                    committed.swap_remove(victim);
                }
                committed.extend(inserted);
            } else {
                txn.abort()?;
            }

            if round % 10 == 9 {
                db.checkpoint()?;
            }
        }

        // One transaction is still running when the process dies
        let loser = db.begin()?;
        for _ in 0..5 {
            let mut tuple = person(&db, table, next_id, "lost")?;
            next_id += 1;
            db.pool().insert_tuple(loser.id(), table, &mut tuple)?;
        }
        if let Some(victim) = committed.first() {
            db.pool().delete_tuple(loser.id(), victim)?;
        }
        db.pool().flush_all_pages()?;
        std::mem::forget(loser);
    }

    let (db, table) = open_db(dir.path(), 20)?;
    db.recover()?;

    let mut expected: Vec<i32> = committed
        .iter()
        .filter_map(|t| match t.field(0) {
            Some(Field::Int(id)) => Some(*id),
            _ => None,
        })
        .collect();
    expected.sort();
    let mut actual = scan_ids(&db, table)?;
    actual.sort();
    assert_eq!(actual, expected);

    // A second recovery changes nothing
    db.recover()?;
    let mut again = scan_ids(&db, table)?;
    again.sort();
    assert_eq!(again, expected);
    Ok(())
}

#[test]
fn test_deadlock_aborts_a_victim() -> Result<()> {
    let dir = tempdir()?;
    let (db, table) = open_db(dir.path(), 10)?;
    let file = db.catalog().database_file(table)?;
    for p in 0..2 {
        file.write_page_bytes(p, &HeapPage::empty_page_data(file.page_size()))?;
    }
    let p0 = PageId::new(table, 0);
    let p1 = PageId::new(table, 1);

    let t1 = db.begin()?;
    let t2 = db.begin()?;
    db.pool().get_page(t1.id(), p0, Permissions::ReadWrite)?;
    db.pool().get_page(t2.id(), p1, Permissions::ReadWrite)?;

    let barrier = Arc::new(Barrier::new(2));
    let pool = Arc::clone(db.pool());
    let b = Arc::clone(&barrier);
    let handle = thread::spawn(move || {
        b.wait();
        let result = pool.get_page(t1.id(), p1, Permissions::ReadWrite).map(|_| ());
        (t1, result)
    });

    barrier.wait();
    let second = db.pool().get_page(t2.id(), p0, Permissions::ReadWrite).map(|_| ());
    let (t1, first) = handle.join().expect("lock thread panicked");

    let aborted = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_abort()))
        .count();
    assert!(aborted >= 1, "no transaction was chosen as deadlock victim");
    for (txn, result) in [(&t1, &first), (&t2, &second)] {
        match result {
            Ok(()) => assert!(db.pool().transactions().is_active(txn.id())),
            Err(e) => {
                assert!(matches!(e, StorageError::Deadlock { .. }));
                assert!(!db.pool().transactions().is_active(txn.id()));
                assert!(db.pool().lock_manager().pages_locked_by(txn.id()).is_empty());
            }
        }
    }

    t1.abort()?;
    t2.abort()?;
    Ok(())
}

#[test]
fn test_page_round_trip_with_strings() -> Result<()> {
    let dir = tempdir()?;
    let (db, table) = open_db(dir.path(), 10)?;
    let desc = db.catalog().tuple_desc(table)?;
    let page_size = db.catalog().page_size();
    let pid = PageId::new(table, 0);

    let empty = HeapPage::empty_page_data(page_size);
    let mut page = HeapPage::new(pid, &empty, Arc::clone(&desc), page_size)?;
    for (id, name) in [(1, "one"), (2, ""), (3, "three")] {
        page.insert_tuple(&mut person(&db, table, id, name)?)?;
    }
    let second = page.iter().nth(1).cloned().expect("three tuples");
    page.delete_tuple(&second)?;

    let bytes = page.to_bytes();
    let reread = HeapPage::new(pid, &bytes, Arc::clone(&desc), page_size)?;
    assert_eq!(reread.to_bytes(), bytes);
    assert_eq!(
        reread.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
        vec!["1\tone", "3\tthree"]
    );
    assert!(!reread.is_slot_used(1));
    Ok(())
}

#[test]
fn test_long_string_reads_the_same_before_and_after_eviction() -> Result<()> {
    let dir = tempdir()?;
    let (db, table) = open_db(dir.path(), 10)?;
    let long = "z".repeat(200);

    let txn = db.begin()?;
    let mut tuple = person(&db, table, 1, &long)?;
    let pid = db.pool().insert_tuple(txn.id(), table, &mut tuple)?[0];
    txn.commit()?;

    let names = |db: &Database| -> Result<Vec<Field>> {
        let txn = db.begin()?;
        let file = db.catalog().database_file(table)?;
        let mut names = Vec::new();
        for tuple in file.iterator(txn.id(), Arc::clone(db.pool())) {
            names.extend(tuple?.field(1).cloned());
        }
        txn.commit()?;
        Ok(names)
    };

    assert!(db.pool().is_cached(pid));
    let cached = names(&db)?;
    db.pool().discard_page(pid);
    let reloaded = names(&db)?;

    assert_eq!(cached, reloaded);
    assert_eq!(cached, vec![Field::Str("z".repeat(128))]);
    Ok(())
}
