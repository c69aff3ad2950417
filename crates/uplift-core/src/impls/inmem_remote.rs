//! InMemoryRemote - 開発・テスト用のリモート
//!
//! 配置先コレクション（position -> name）をメモリ上に持ち、
//! 操作ごと・タスク名ごとに失敗や遅延を仕込める。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::domain::{Credential, Payload, TargetId, UploadTask};
use crate::error::RemoteError;
use crate::ports::{TransferProgress, UploadRemote};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Sign,
    Transfer,
    Commit,
}

/// One scripted reaction, consumed by the next matching call.
#[derive(Debug, Clone)]
enum Script {
    Fail(RemoteError),
    Delay(Duration),
}

#[derive(Default)]
struct InMemoryTarget {
    /// Committed collection: position -> task name.
    committed: BTreeMap<u64, String>,

    scripts: HashMap<(RemoteOp, String), VecDeque<Script>>,

    /// Transfer duration per task name (applies to every attempt).
    transfer_latency: HashMap<String, Duration>,

    /// Issued credential -> task name.
    credentials: HashMap<String, String>,

    calls: Vec<(RemoteOp, String)>,

    issued: u64,
}

/// In-memory stand-in for the upload service.
pub struct InMemoryRemote {
    target: Mutex<InMemoryTarget>,
    flakiness: f64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            target: Mutex::new(InMemoryTarget::default()),
            flakiness: 0.0,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Unscripted calls fail with 503 with probability `rate`.
    pub fn with_flakiness(mut self, rate: f64) -> Self {
        self.flakiness = rate.clamp(0.0, 1.0);
        self
    }

    /// Seed the collection, e.g. to model assets that already exist before `base_position`.
    pub fn with_committed(self, position: u64, name: impl Into<String>) -> Self {
        self.state().committed.insert(position, name.into());
        self
    }

    /// The next `op` call for `name` fails with `err`. Calls queue up in order.
    pub fn fail_next(&self, op: RemoteOp, name: &str, err: RemoteError) {
        self.push_script(op, name, Script::Fail(err));
    }

    /// The next `op` call for `name` takes `delay` before succeeding.
    pub fn delay_next(&self, op: RemoteOp, name: &str, delay: Duration) {
        self.push_script(op, name, Script::Delay(delay));
    }

    pub fn set_transfer_latency(&self, name: &str, latency: Duration) {
        self.state()
            .transfer_latency
            .insert(name.to_string(), latency);
    }

    pub fn committed(&self) -> BTreeMap<u64, String> {
        self.state().committed.clone()
    }

    /// Names passed to `op`, one entry per call, in call order.
    pub fn calls(&self, op: RemoteOp) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn call_count(&self, op: RemoteOp, name: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|(o, n)| *o == op && n == name)
            .count()
    }

    /// Highest number of transfers that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, InMemoryTarget> {
        self.target
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push_script(&self, op: RemoteOp, name: &str, script: Script) {
        self.state()
            .scripts
            .entry((op, name.to_string()))
            .or_default()
            .push_back(script);
    }

    /// Record the call and take its scripted reaction, if any.
    fn begin(&self, op: RemoteOp, name: &str) -> Option<Script> {
        let mut state = self.state();
        state.calls.push((op, name.to_string()));
        state
            .scripts
            .get_mut(&(op, name.to_string()))
            .and_then(|q| q.pop_front())
    }

    fn roll_flaky(&self) -> bool {
        self.flakiness > 0.0 && rand::thread_rng().gen_bool(self.flakiness)
    }

    async fn react(&self, script: Option<Script>) -> Result<(), RemoteError> {
        match script {
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None if self.roll_flaky() => Err(RemoteError::status(503, "service unavailable")),
            None => Ok(()),
        }
    }

    fn owner_of(&self, credential: &Credential) -> Result<String, RemoteError> {
        self.state()
            .credentials
            .get(credential.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::status(403, "unknown credential"))
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts a transfer as in flight until dropped (also on timeout cancellation).
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl UploadRemote for InMemoryRemote {
    async fn sign(&self, task: &UploadTask, target: &TargetId) -> Result<Credential, RemoteError> {
        let script = self.begin(RemoteOp::Sign, task.name());
        self.react(script).await?;

        let mut state = self.state();
        state.issued += 1;
        let credential = format!("{target}/{}/{}", task.original_index(), state.issued);
        state
            .credentials
            .insert(credential.clone(), task.name().to_string());
        Ok(Credential::new(credential))
    }

    async fn transfer(
        &self,
        credential: &Credential,
        _payload: &Payload,
        progress: &TransferProgress,
    ) -> Result<(), RemoteError> {
        let name = self.owner_of(credential)?;
        let _guard = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        progress.report(0.0);

        let script = self.begin(RemoteOp::Transfer, &name);
        self.react(script).await?;

        let latency = self.state().transfer_latency.get(&name).copied();
        if let Some(latency) = latency {
            progress.report(0.5);
            tokio::time::sleep(latency).await;
        }
        progress.report(1.0);
        Ok(())
    }

    async fn commit(
        &self,
        task: &UploadTask,
        credential: &Credential,
        position: u64,
    ) -> Result<(), RemoteError> {
        let owner = self.owner_of(credential)?;
        if owner != task.name() {
            return Err(RemoteError::status(403, "credential belongs to another task"));
        }

        let script = self.begin(RemoteOp::Commit, task.name());
        self.react(script).await?;

        let mut state = self.state();
        match state.committed.get(&position) {
            Some(existing) if existing != task.name() => Err(RemoteError::status(
                409,
                format!("position {position} already holds {existing}"),
            )),
            _ => {
                state.committed.insert(position, task.name().to_string());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::impls::NoopEventSink;

    fn task(index: usize) -> UploadTask {
        UploadTask::new(index, format!("t{index}"), Payload::new(vec![9], "image/png"))
    }

    #[tokio::test]
    async fn sign_transfer_commit_roundtrip() {
        let remote = InMemoryRemote::new();
        let t = task(0);
        let cred = remote.sign(&t, &TargetId::new("gallery")).await.unwrap();
        let progress = TransferProgress::new(&t, Arc::new(NoopEventSink));
        remote.transfer(&cred, t.payload(), &progress).await.unwrap();
        remote.commit(&t, &cred, 10).await.unwrap();

        assert_eq!(remote.committed().get(&10).map(String::as_str), Some("t0"));
        assert_eq!(remote.calls(RemoteOp::Transfer), vec!["t0".to_string()]);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let remote = InMemoryRemote::new();
        let t = task(0);
        let target = TargetId::new("gallery");
        remote.fail_next(RemoteOp::Sign, "t0", RemoteError::status(503, "busy"));
        remote.fail_next(RemoteOp::Sign, "t0", RemoteError::status(429, "slow down"));

        let e1 = remote.sign(&t, &target).await.unwrap_err();
        let e2 = remote.sign(&t, &target).await.unwrap_err();
        assert_eq!(e1.http_status(), Some(503));
        assert_eq!(e2.http_status(), Some(429));
        assert!(remote.sign(&t, &target).await.is_ok());
        assert_eq!(remote.call_count(RemoteOp::Sign, "t0"), 3);
    }

    #[tokio::test]
    async fn occupied_position_conflicts() {
        let remote = InMemoryRemote::new().with_committed(3, "existing.png");
        let t = task(0);
        let cred = remote.sign(&t, &TargetId::new("gallery")).await.unwrap();
        let err = remote.commit(&t, &cred, 3).await.unwrap_err();
        assert_eq!(err.http_status(), Some(409));
    }

    #[tokio::test]
    async fn unknown_credential_is_forbidden() {
        let remote = InMemoryRemote::new();
        let t = task(0);
        let progress = TransferProgress::new(&t, Arc::new(NoopEventSink));
        let err = remote
            .transfer(&Credential::new("forged"), t.payload(), &progress)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(403));
    }

    #[tokio::test]
    async fn fully_flaky_remote_always_fails_unscripted_calls() {
        let remote = InMemoryRemote::new().with_flakiness(1.0);
        let err = remote
            .sign(&task(0), &TargetId::new("gallery"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(503));
    }
}
