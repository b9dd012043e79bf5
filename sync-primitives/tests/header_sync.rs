//! Header sync shaped workload: fetch heights in parallel from a pool of
//! peers, commit them strictly in height order under a write lock while
//! readers query the committed tip.

use {
    async_trait::async_trait,
    parking_lot::Mutex,
    std::{
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Duration,
    },
    trv1_sync_primitives::{
        HandlerPool, LimitedConcurrency, OrderedQueue, OrderedQueueConfig, QueueEvent,
        QueueProcessor, RwLock,
    },
};

struct HeaderFetcher {
    peers: HandlerPool<u16>,
    fetches: AtomicU64,
}

#[async_trait]
impl QueueProcessor for HeaderFetcher {
    type Task = u64;
    type Output = (u64, u16);
    type Error = String;

    async fn process(&self, height: &u64) -> Result<(u64, u16), String> {
        let peer = self
            .peers
            .get(Duration::from_secs(5))
            .await
            .map_err(|e| e.to_string())?;
        let attempt = self.fetches.fetch_add(1, Ordering::SeqCst);
        // Later heights answer faster.
        tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(height % 20))).await;
        self.peers.put(peer);
        if attempt == 3 {
            return Err(format!("peer {peer} dropped height {height}"));
        }
        Ok((*height, peer))
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fetch_in_parallel_commit_in_order() {
    init_logger();

    let peers = HandlerPool::new();
    for peer in 0..3u16 {
        peers.add(peer);
    }
    let fetcher = HeaderFetcher {
        peers: peers.clone(),
        fetches: AtomicU64::new(0),
    };
    let config = OrderedQueueConfig {
        limit: 8,
        retry_backoff: Duration::from_millis(5),
    };
    let (queue, mut events) = OrderedQueue::new(config, fetcher).unwrap();
    for height in 100..140 {
        queue.insert(height);
    }

    let chain = Arc::new(Mutex::new(Vec::<u64>::new()));
    let lock = RwLock::new(64);
    let committer = tokio::spawn({
        let chain = chain.clone();
        let lock = lock.clone();
        async move {
            let mut errors = 0;
            while let Some(event) = events.recv().await {
                match event {
                    QueueEvent::Result {
                        task, output: (height, _peer), ..
                    } => {
                        assert_eq!(task, height);
                        let chain = chain.clone();
                        lock.run_with_write_lock(|| async move { chain.lock().push(height) })
                            .await
                            .unwrap();
                    }
                    QueueEvent::Error { .. } => errors += 1,
                }
            }
            errors
        }
    });

    let readers = LimitedConcurrency::new(4).unwrap();
    let mut tips = Vec::new();
    for _ in 0..16 {
        let chain = chain.clone();
        let lock = lock.clone();
        tips.push(readers.new_concurrency(move || async move {
            lock.run_with_read_lock(
                || async move { chain.lock().last().copied() },
                Some(Duration::from_secs(5)),
            )
            .await
        }));
    }

    queue.start().await.unwrap();
    assert_eq!(queue.processed(), 40);
    drop(queue);

    assert_eq!(committer.await.unwrap(), 1);
    assert_eq!(*chain.lock(), (100..140).collect::<Vec<_>>());

    readers.finished().await;
    for tip in tips {
        let tip = tip.join().await.unwrap().unwrap();
        assert!(tip.map_or(true, |height| (100..140).contains(&height)));
    }

    assert_eq!(peers.idle_count(), 3);
    assert_eq!(peers.busy_count(), 0);
    assert_eq!(lock.active_reads(), 0);
    assert!(!lock.is_write_locked());
}
