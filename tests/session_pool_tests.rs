/// Session pool tests
///
/// Reuse, bounded retention under parallel load, and what the pool refuses
/// to take back.
/// Run with: cargo test --test session_pool_tests
mod common;

use anyhow::anyhow;
use common::{Foo, foo, foo_rows, foo_with_bar, setup};
use futures::future::join_all;
use scoped_persistence::{AllQuery, FlushPolicy, PersistenceError, PersistenceOptions, Session};

fn pooled(max: usize) -> PersistenceOptions {
    PersistenceOptions::new()
        .use_session_pool(true)
        .max_pooled_sessions(max)
}

#[test]
fn test_sequential_calls_reuse_one_session() {
    let (store, persistence) = setup(pooled(2));
    let foos = persistence.repository::<Foo>();
    let mut scope = persistence.scope();

    for n in 0..5 {
        foos.add(&mut scope, foo(&format!("foo-{}", n))).unwrap();
    }
    persistence
        .unit_of_work()
        .run(&mut scope, |scope| foos.add(scope, foo("in-unit")).map(|_| ()))
        .unwrap();

    let stats = persistence.pool_stats().unwrap();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.outstanding, 0);
    assert_eq!(store.sessions_created(), 1);
    assert_eq!(foo_rows(&store), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_writes_never_exceed_retained_bound() {
    let (store, persistence) = setup(pooled(2));
    let persistence = std::sync::Arc::new(persistence);

    let tasks = (0..16).map(|n| {
        let persistence = std::sync::Arc::clone(&persistence);
        tokio::spawn(async move {
            let foos = persistence.repository::<Foo>();
            let mut scope = persistence.scope();
            persistence
                .unit_of_work()
                .run_async(&mut scope, |mut scope| async move {
                    foos.add_async(&mut scope, foo(&format!("parallel-{}", n))).await?;
                    tokio::task::yield_now().await;
                    Ok::<_, PersistenceError>(())
                })
                .await
        })
    });
    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }

    let stats = persistence.pool_stats().unwrap();
    assert!(stats.idle <= 2, "{}", stats);
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.created, stats.idle + stats.discarded);
    assert_eq!(store.sessions_alive(), stats.idle);
    assert_eq!(foo_rows(&store), 16);
}

#[test]
fn test_parallel_threads_never_exceed_retained_bound() {
    let (store, persistence) = setup(pooled(3));
    let foos = persistence.repository::<Foo>();

    std::thread::scope(|s| {
        for worker in 0..8 {
            let persistence = &persistence;
            let foos = &foos;
            s.spawn(move || {
                let mut scope = persistence.scope();
                for n in 0..10 {
                    foos.add(&mut scope, foo(&format!("w{}-{}", worker, n)))
                        .unwrap();
                }
            });
        }
    });

    let stats = persistence.pool_stats().unwrap();
    assert!(stats.idle <= 3, "{}", stats);
    assert_eq!(stats.outstanding, 0);
    assert!(store.sessions_alive() <= 3);
    assert_eq!(foo_rows(&store), 80);
}

#[test]
fn test_session_with_staged_changes_is_discarded() {
    let (store, persistence) = setup(pooled(2).flush_policy(FlushPolicy::Manual));
    let foos = persistence.repository::<Foo>();
    let mut scope = persistence.scope();

    let result = persistence.unit_of_work().run(&mut scope, |scope| {
        foos.add(scope, foo("staged"))?;
        Err(anyhow!("never flushed"))
    });
    assert!(result.is_err());

    let stats = persistence.pool_stats().unwrap();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.discarded, 1);
    assert_eq!(store.sessions_alive(), 0);
    assert_eq!(foo_rows(&store), 0);
}

#[test]
fn test_returned_session_has_no_open_transaction() {
    let (store, persistence) = setup(pooled(1));
    let foos = persistence.repository::<Foo>();
    let mut scope = persistence.scope();

    let result = persistence.unit_of_work().run(&mut scope, |scope| {
        foos.add(scope, foo("rolled-back"))?;
        Err(anyhow!("abort"))
    });
    assert!(result.is_err());
    assert_eq!(persistence.pool_stats().unwrap().idle, 1);

    persistence
        .unit_of_work()
        .run(&mut scope, |scope| foos.add(scope, foo("committed")).map(|_| ()))
        .unwrap();

    let names: Vec<String> = foos
        .query(&mut scope, &AllQuery::<Foo>::new())
        .unwrap()
        .into_iter()
        .map(|foo| foo.name)
        .collect();
    assert_eq!(names, vec!["committed"]);
    assert_eq!(store.sessions_created(), 1);
}

#[test]
fn test_leaked_fork_returns_session_when_dropped() {
    let (store, persistence) = setup(pooled(2));
    let mut scope = persistence.scope();

    let leaked = persistence
        .unit_of_work()
        .run_with(&mut scope, |scope| Ok::<_, PersistenceError>(scope.fork()))
        .unwrap();
    assert!(leaked.has_session());
    assert!(!leaked.owns_session());
    assert!(!scope.has_session());

    let stats = persistence.pool_stats().unwrap();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.outstanding, 1);

    drop(leaked);
    let stats = persistence.pool_stats().unwrap();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.discarded, 0);
    assert_eq!(store.sessions_alive(), 1);
}

#[test]
fn test_session_held_across_clear_is_reused() {
    let (store, persistence) = setup(pooled(2));
    let foos = persistence.repository::<Foo>();
    let context = persistence.context();
    let mut scope = persistence.scope();

    for n in 0..3 {
        let session = context.init(&mut scope).unwrap();
        foos.add(&mut scope, foo(&format!("cycle-{}", n))).unwrap();
        context.clear(&mut scope).unwrap();
        assert!(!session.lock().unwrap().has_pending_changes());
    }

    let stats = persistence.pool_stats().unwrap();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.outstanding, 0);
    assert_eq!(store.sessions_created(), 1);
    assert_eq!(foo_rows(&store), 3);
}

#[test]
fn test_dropped_scope_gives_session_back() {
    let (store, persistence) = setup(pooled(2));
    {
        let mut scope = persistence.scope();
        persistence.context().init(&mut scope).unwrap();
        assert_eq!(persistence.pool_stats().unwrap().outstanding, 1);
    }

    let stats = persistence.pool_stats().unwrap();
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.idle, 1);
    assert_eq!(store.sessions_alive(), 1);
}

#[test]
fn test_pooled_session_keeps_its_identity_map() {
    let (_store, persistence) = setup(pooled(1));
    let foos = persistence.repository::<Foo>();
    let mut scope = persistence.scope();

    foos.add(&mut scope, foo_with_bar("tracked", "fixed-up")).unwrap();

    let reused = foos.query(&mut scope, &AllQuery::<Foo>::new()).unwrap();
    assert_eq!(persistence.pool_stats().unwrap().created, 1);
    assert_eq!(reused[0].bar.as_ref().unwrap().name, "fixed-up");
}
