//! Hand-off queue between two stages.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::domain::UploadTask;

/// FIFO of tasks waiting for one stage.
///
/// タスクは値として move されるので、キューに入っている間は他のどの worker からも
/// 触れない。ロックは push/pop の中で完結し、await を跨がない。
pub struct StageQueue {
    items: Mutex<VecDeque<UploadTask>>,
    notify: Notify,
}

impl StageQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = UploadTask>) -> Self {
        Self {
            items: Mutex::new(tasks.into_iter().collect()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, task: UploadTask) {
        self.items.lock().await.push_back(task);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> Option<UploadTask> {
        self.items.lock().await.pop_front()
    }

    /// Remove everything still queued (used when a run is aborted).
    pub async fn drain(&self) -> Vec<UploadTask> {
        self.items.lock().await.drain(..).collect()
    }

    /// Resolves on the next push (or a permit left by an earlier one).
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl Default for StageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::domain::Payload;

    fn task(index: usize) -> UploadTask {
        UploadTask::new(index, format!("t{index}"), Payload::new(vec![], "image/png"))
    }

    #[tokio::test]
    async fn pops_in_fifo_order() {
        let q = StageQueue::new();
        for i in 0..3 {
            q.push(task(i)).await;
        }
        assert_eq!(q.pop().await.unwrap().original_index(), 0);
        assert_eq!(q.pop().await.unwrap().original_index(), 1);
        assert_eq!(q.pop().await.unwrap().original_index(), 2);
        assert!(q.pop().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pops_neither_lose_nor_duplicate() {
        let q = Arc::new(StageQueue::with_tasks((0..200).map(task)));

        let mut joins = Vec::new();
        for _ in 0..8 {
            let q = Arc::clone(&q);
            joins.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(t) = q.pop().await {
                    seen.push(t.original_index());
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for j in joins {
            all.extend(j.await.unwrap());
        }
        assert_eq!(all.len(), 200);
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn push_wakes_waiter() {
        let q = Arc::new(StageQueue::new());
        let waiter = tokio::spawn({
            let q = Arc::clone(&q);
            async move {
                q.notified().await;
                q.pop().await.map(|t| t.original_index())
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push(task(5)).await;

        let woken = tokio::time::timeout(Duration::from_secs(60), waiter)
            .await
            .expect("push should wake the waiter");
        assert_eq!(woken.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn drain_empties_queue() {
        let q = StageQueue::with_tasks((0..4).map(task));
        let drained = q.drain().await;
        assert_eq!(drained.len(), 4);
        assert!(q.pop().await.is_none());
    }
}
