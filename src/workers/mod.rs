use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use uuid::Uuid;

/// A worker's completion signal, split into a marking half kept by the
/// worker and an observing half kept by the registry. The worker marks it
/// strictly before its final return, so a set flag means the thread is safe
/// to join without blocking for long.
#[derive(Clone, Debug, Default)]
pub struct CompletionToken {
    completed: Arc<AtomicBool>,
}

impl CompletionToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_complete(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

pub struct WorkerRecord {
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
    /// Clone of the session's socket, kept so shutdown can force-unblock a
    /// read that is still in flight. `None` for the heartbeat-style workers
    /// that own no socket.
    pub stream: Option<TcpStream>,
    pub completion: CompletionToken,
    pub handle: JoinHandle<()>,
}

impl WorkerRecord {
    pub fn new(
        peer: Option<SocketAddr>,
        stream: Option<TcpStream>,
        completion: CompletionToken,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            stream,
            completion,
            handle,
        }
    }
}

/// Owns every spawned session worker. Records are reaped opportunistically
/// after each registration and drained completely at shutdown; none is
/// leaked or joined twice.
#[derive(Default)]
pub struct WorkerRegistry {
    records: Mutex<Vec<WorkerRecord>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, record: WorkerRecord) -> Uuid {
        let id = record.id;
        self.lock().push(record);
        id
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Joins and removes every record whose completion flag is set, without
    /// blocking on still-running workers. Returns the number reaped.
    pub fn reap_completed(&self) -> usize {
        let mut records = self.lock();
        let mut finished = Vec::new();
        let mut index = 0;
        while index < records.len() {
            if records[index].completion.is_complete() {
                finished.push(records.swap_remove(index));
            } else {
                index += 1;
            }
        }
        drop(records);

        let reaped = finished.len();
        for record in finished {
            let _ = record.handle.join();
        }
        reaped
    }

    /// Shuts down every record's socket (unblocking any read still in
    /// flight) and joins every worker, completed or not. Shutdown-time only.
    pub fn join_all(&self) {
        let drained: Vec<WorkerRecord> = self.lock().drain(..).collect();

        for record in &drained {
            if let Some(stream) = &record.stream {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        for record in drained {
            let _ = record.handle.join();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<WorkerRecord>> {
        self.records.lock().expect("worker registry lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::{CompletionToken, WorkerRecord, WorkerRegistry};

    fn spawn_completing_worker(registry: &WorkerRegistry) {
        let completion = CompletionToken::new();
        let worker_completion = completion.clone();
        let handle = thread::spawn(move || {
            worker_completion.mark_complete();
        });
        registry.register(WorkerRecord::new(None, None, completion, handle));
    }

    #[test]
    fn reap_joins_only_completed_workers() {
        let registry = WorkerRegistry::new();

        spawn_completing_worker(&registry);

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let running_completion = CompletionToken::new();
        let worker_completion = running_completion.clone();
        let handle = thread::spawn(move || {
            release_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("release signal should arrive");
            worker_completion.mark_complete();
        });
        registry.register(WorkerRecord::new(None, None, running_completion, handle));
        assert_eq!(registry.active_count(), 2);

        // The completed worker may still be between flag store and return;
        // poll briefly instead of assuming instant completion.
        let mut reaped_total = 0;
        for _ in 0..50 {
            reaped_total += registry.reap_completed();
            if reaped_total == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(reaped_total, 1);
        assert_eq!(registry.active_count(), 1);

        release_tx.send(()).expect("release send should work");
        registry.join_all();
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn join_all_drains_every_record() {
        let registry = WorkerRegistry::new();
        for _ in 0..3 {
            spawn_completing_worker(&registry);
        }

        registry.join_all();
        assert_eq!(registry.active_count(), 0);

        // A second join_all on an empty registry is a no-op.
        registry.join_all();
    }

    #[test]
    fn completion_token_halves_observe_the_same_flag() {
        let token = CompletionToken::new();
        let marker = token.clone();

        assert!(!token.is_complete());
        marker.mark_complete();
        assert!(token.is_complete());
    }
}
