use setnx_lease::{Cancel, Cancelled, Db, DbDropGuard, Lease, LeaseStore};

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

/// Almacen que cuenta las operaciones y puede fallar a voluntad.
#[derive(Clone)]
struct Flaky {
    db: Db,
    attempts: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
    fail_set: bool,
    fail_delete: bool,
}

impl Flaky {
    fn new(db: Db) -> Flaky {
        Flaky {
            db,
            attempts: Arc::new(AtomicUsize::new(0)),
            deletes: Arc::new(AtomicUsize::new(0)),
            fail_set: false,
            fail_delete: false,
        }
    }
}

#[async_trait]
impl LeaseStore for Flaky {
    async fn set_if_absent(&mut self, key: &str, value: Bytes, ttl: Duration) -> setnx_lease::Result<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.fail_set {
            return Err("connection refused".into());
        }

        self.db.set_if_absent(key, value, ttl).await
    }

    async fn delete(&mut self, key: &str) -> setnx_lease::Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);

        if self.fail_delete {
            return Err("connection reset".into());
        }

        LeaseStore::delete(&mut self.db, key).await
    }

    async fn delete_if_equals(&mut self, key: &str, value: Bytes) -> setnx_lease::Result<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.db.delete_if_equals(key, value).await
    }
}

const TTL: Duration = Duration::from_secs(3);

#[tokio::test(start_paused = true)]
async fn second_holder_is_refused_until_release() {
    let guard = DbDropGuard::new();

    let mut a = Lease::new(guard.db(), "job:42", TTL);
    let mut b = Lease::new(guard.db(), "job:42", TTL);

    assert!(a.try_acquire().await);
    assert!(a.is_held());
    assert_eq!(guard.db().get("job:42"), Some(a.token().clone()));

    assert!(!b.try_acquire().await);
    assert!(!b.is_held());

    a.release().await.unwrap();
    assert!(!a.is_held());
    assert_eq!(guard.db().get("job:42"), None);

    assert!(b.try_acquire().await);
    assert_eq!(guard.db().get("job:42"), Some(b.token().clone()));
}

#[tokio::test(start_paused = true)]
async fn crashed_holder_is_replaced_after_ttl() {
    let guard = DbDropGuard::new();

    let mut crashed = Lease::new(guard.db(), "job:42", Duration::from_secs(1));
    assert!(crashed.try_acquire().await);

    // El proceso muere sin liberar.
    drop(crashed);

    let mut waiter = Lease::new(guard.db(), "job:42", Duration::from_secs(1));

    let start = Instant::now();
    assert!(waiter.try_acquire_timeout(Duration::from_secs(2)).await);

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(1), "acquired too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "acquired too late: {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn key_disappears_when_ttl_elapses() {
    let guard = DbDropGuard::new();

    let mut lease = Lease::new(guard.db(), "job:42", TTL);
    assert!(lease.try_acquire().await);

    time::advance(TTL + Duration::from_millis(1)).await;

    assert_eq!(guard.db().get("job:42"), None);

    // El flag local no se entera de la expiracion.
    assert!(lease.is_held());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_contender_wins() {
    let guard = DbDropGuard::new();
    let winners = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..16 {
        let db = guard.db();
        let winners = winners.clone();

        handles.push(tokio::spawn(async move {
            let mut lease = Lease::new(db, "job:42", TTL);
            if lease.try_acquire().await {
                winners.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn release_is_idempotent() {
    let guard = DbDropGuard::new();
    let store = Flaky::new(guard.db());
    let deletes = store.deletes.clone();

    let mut lease = Lease::new(store, "job:42", TTL);

    // Sin tener el lease no se toca el almacen.
    lease.release().await.unwrap();
    assert_eq!(deletes.load(Ordering::SeqCst), 0);

    assert!(lease.try_acquire().await);

    lease.release().await.unwrap();
    lease.release().await.unwrap();

    assert_eq!(deletes.load(Ordering::SeqCst), 1);
    assert!(!lease.is_held());
}

#[tokio::test]
async fn acquire_is_not_reentrant() {
    let guard = DbDropGuard::new();

    let mut lease = Lease::new(guard.db(), "job:42", TTL);

    assert!(lease.try_acquire().await);
    assert!(!lease.try_acquire().await);

    // El segundo intento no cambia el estado.
    assert!(lease.is_held());
    assert_eq!(guard.db().get("job:42"), Some(lease.token().clone()));
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_makes_one_attempt() {
    let guard = DbDropGuard::new();
    let store = Flaky::new(guard.db());
    let attempts = store.attempts.clone();

    let mut holder = Lease::new(guard.db(), "job:42", TTL);
    assert!(holder.try_acquire().await);

    let mut lease = Lease::new(store, "job:42", TTL);
    assert!(!lease.try_acquire_timeout(Duration::ZERO).await);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    holder.release().await.unwrap();

    assert!(lease.try_acquire_timeout(Duration::ZERO).await);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn wait_times_out_while_held() {
    let guard = DbDropGuard::new();

    let mut holder = Lease::new(guard.db(), "job:42", TTL);
    assert!(holder.try_acquire().await);

    let mut lease = Lease::new(guard.db(), "job:42", TTL);

    let start = Instant::now();
    assert!(!lease.try_acquire_timeout(Duration::from_millis(500)).await);
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert!(!lease.is_held());
}

#[tokio::test(start_paused = true)]
async fn attempts_follow_poll_interval() {
    let guard = DbDropGuard::new();
    let store = Flaky::new(guard.db());
    let attempts = store.attempts.clone();

    let mut holder = Lease::new(guard.db(), "job:42", TTL);
    assert!(holder.try_acquire().await);

    let mut lease = Lease::new(store, "job:42", TTL).with_poll_interval(Duration::from_millis(10));
    assert!(!lease.try_acquire_timeout(Duration::from_millis(100)).await);

    // Intento en 0ms, 10ms, ..., 100ms.
    assert_eq!(attempts.load(Ordering::SeqCst), 11);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_wait() {
    let guard = DbDropGuard::new();

    let mut holder = Lease::new(guard.db(), "job:42", TTL);
    assert!(holder.try_acquire().await);

    let (tx, rx) = broadcast::channel(1);
    let mut cancel = Cancel::new(rx);

    tokio::spawn(async move {
        time::sleep(Duration::from_millis(200)).await;
        tx.send(()).unwrap();
    });

    let mut lease = Lease::new(guard.db(), "job:42", TTL);

    let start = Instant::now();
    let res = lease.try_acquire_for(Duration::from_secs(60), &mut cancel).await;

    assert_eq!(res, Err(Cancelled));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!lease.is_held());
}

#[tokio::test]
async fn cancelled_before_wait_is_not_a_timeout() {
    let guard = DbDropGuard::new();

    let (tx, rx) = broadcast::channel(1);
    let mut cancel = Cancel::new(rx);
    tx.send(()).unwrap();

    // Aun con la clave libre, la cancelacion tiene prioridad.
    let mut lease = Lease::new(guard.db(), "job:42", TTL);
    let res = lease.try_acquire_for(Duration::from_secs(1), &mut cancel).await;

    assert_eq!(res, Err(Cancelled));
    assert!(!lease.is_held());
    assert_eq!(guard.db().get("job:42"), None);
}

#[tokio::test]
async fn store_failure_is_reported_as_not_acquired() {
    let guard = DbDropGuard::new();
    let mut store = Flaky::new(guard.db());
    store.fail_set = true;

    let mut lease = Lease::new(store, "job:42", TTL);

    assert!(!lease.try_acquire().await);
    assert!(!lease.is_held());

    assert!(lease.try_acquire_checked().await.is_err());
    assert!(!lease.is_held());
}

#[tokio::test]
async fn failed_release_still_clears_held() {
    let guard = DbDropGuard::new();
    let mut store = Flaky::new(guard.db());
    store.fail_delete = true;

    let mut lease = Lease::new(store, "job:42", TTL);
    assert!(lease.try_acquire().await);

    assert!(lease.release().await.is_err());
    assert!(!lease.is_held());

    // La clave sigue ahi hasta que venza la expiracion.
    assert_eq!(guard.db().get("job:42"), Some(lease.token().clone()));

    // Ya no se tiene, no se vuelve a intentar.
    lease.release().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn release_if_owned_spares_successor() {
    let guard = DbDropGuard::new();

    let mut stale = Lease::new(guard.db(), "job:42", Duration::from_secs(1));
    assert!(stale.try_acquire().await);

    time::advance(Duration::from_millis(1500)).await;

    let mut successor = Lease::new(guard.db(), "job:42", TTL);
    assert!(successor.try_acquire().await);

    assert!(!stale.release_if_owned().await.unwrap());
    assert!(!stale.is_held());
    assert_eq!(guard.db().get("job:42"), Some(successor.token().clone()));

    assert!(successor.release_if_owned().await.unwrap());
    assert_eq!(guard.db().get("job:42"), None);
}

#[tokio::test(start_paused = true)]
async fn unconditional_release_after_expiry_deletes_successor() {
    let guard = DbDropGuard::new();

    let mut stale = Lease::new(guard.db(), "job:42", Duration::from_secs(1));
    assert!(stale.try_acquire().await);

    time::advance(Duration::from_millis(1500)).await;

    let mut successor = Lease::new(guard.db(), "job:42", TTL);
    assert!(successor.try_acquire().await);

    // `release` no comprueba el token.
    stale.release().await.unwrap();
    assert_eq!(guard.db().get("job:42"), None);
    assert!(successor.is_held());
}

#[tokio::test]
async fn caller_supplied_token_is_written() {
    let guard = DbDropGuard::new();

    let mut lease = Lease::with_token(guard.db(), "job:42", "worker-7", TTL);
    assert!(lease.try_acquire().await);

    assert_eq!(guard.db().get("job:42"), Some(Bytes::from_static(b"worker-7")));
    assert_eq!(lease.key(), "job:42");
    assert_eq!(lease.ttl(), TTL);
}

#[test]
#[should_panic]
fn zero_ttl_is_rejected() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let _guard = rt.enter();
    let guard = DbDropGuard::new();
    let _ = Lease::new(guard.db(), "job:42", Duration::ZERO);
}

#[test]
#[should_panic(expected = "at least one millisecond")]
fn sub_millisecond_ttl_is_rejected() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let _guard = rt.enter();
    let guard = DbDropGuard::new();

    // Se enviaria como `PX 0`.
    let _ = Lease::new(guard.db(), "job:42", Duration::from_micros(500));
}
