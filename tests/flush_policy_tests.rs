/// Flush policy tests
///
/// When staged writes become visible to queries under each policy.
/// Run with: cargo test --test flush_policy_tests
mod common;

use common::{Foo, foo, foo_rows, setup};
use scoped_persistence::{AllQuery, FlushPolicy, PersistenceError, PersistenceOptions};

fn with_policy(policy: FlushPolicy) -> PersistenceOptions {
    PersistenceOptions::new().flush_policy(policy)
}

#[test]
fn test_auto_writes_are_queryable_inside_the_unit() {
    let (store, persistence) = setup(with_policy(FlushPolicy::Auto));
    let foos = persistence.repository::<Foo>();
    let mut scope = persistence.scope();

    persistence
        .unit_of_work()
        .run(&mut scope, |scope| {
            foos.add(scope, foo("visible"))?;
            assert_eq!(foos.count(scope, &AllQuery::<Foo>::new())?, 1);
            Ok::<_, PersistenceError>(())
        })
        .unwrap();

    assert_eq!(foo_rows(&store), 1);
}

#[test]
fn test_manual_writes_wait_for_explicit_flush() {
    let (store, persistence) = setup(with_policy(FlushPolicy::Manual));
    let foos = persistence.repository::<Foo>();
    let mut scope = persistence.scope();

    persistence
        .unit_of_work()
        .run(&mut scope, |scope| {
            let added = foos.add(scope, foo("staged"))?;
            assert_eq!(foos.count(scope, &AllQuery::<Foo>::new())?, 0);
            assert!(foos.get(scope, &added.foo_id)?.is_some());

            foos.flush(scope)?;
            assert_eq!(foos.count(scope, &AllQuery::<Foo>::new())?, 1);
            assert_eq!(foo_rows(&store), 0);
            Ok::<_, PersistenceError>(())
        })
        .unwrap();

    assert_eq!(foo_rows(&store), 1);
}

#[test]
fn test_suppressed_writes_persist_only_at_commit() {
    let (store, persistence) = setup(with_policy(FlushPolicy::Suppressed));
    let foos = persistence.repository::<Foo>();
    let mut scope = persistence.scope();

    persistence
        .unit_of_work()
        .run(&mut scope, |scope| {
            foos.add(scope, foo("held back"))?;
            foos.flush(scope)?;
            assert_eq!(foos.count(scope, &AllQuery::<Foo>::new())?, 0);
            Ok::<_, PersistenceError>(())
        })
        .unwrap();

    assert_eq!(foo_rows(&store), 1);
}

#[test]
fn test_private_session_always_flushes() {
    for policy in [FlushPolicy::Auto, FlushPolicy::Manual, FlushPolicy::Suppressed] {
        let (store, persistence) = setup(with_policy(policy));
        let foos = persistence.repository::<Foo>();
        let mut scope = persistence.scope();

        let mut added = foos.add(&mut scope, foo("direct")).unwrap();
        added.name = "updated".into();
        foos.update(&mut scope, added.clone()).unwrap();

        assert_eq!(foo_rows(&store), 1, "{:?}", policy);
        let loaded = foos.get(&mut scope, &added.foo_id).unwrap().unwrap();
        assert_eq!(loaded.name, "updated");
    }
}

#[test]
fn test_flush_without_session_is_a_no_op() {
    let (store, persistence) = setup(with_policy(FlushPolicy::Manual));
    let foos = persistence.repository::<Foo>();
    let mut scope = persistence.scope();

    foos.flush(&mut scope).unwrap();
    assert_eq!(store.sessions_created(), 0);
}

#[tokio::test]
async fn test_async_flush() {
    let (store, persistence) = setup(with_policy(FlushPolicy::Manual));
    let foos = persistence.repository::<Foo>();
    let mut scope = persistence.scope();

    persistence
        .unit_of_work()
        .run_async(&mut scope, |mut scope| {
            let foos = foos.clone();
            async move {
                foos.add_async(&mut scope, foo("async")).await?;
                foos.flush_async(&mut scope).await?;
                let all = foos.query_async(&mut scope, &AllQuery::<Foo>::new()).await?;
                assert_eq!(all.len(), 1);
                Ok::<_, PersistenceError>(())
            }
        })
        .await
        .unwrap();

    assert_eq!(foo_rows(&store), 1);
}
