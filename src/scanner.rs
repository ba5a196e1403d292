//! The two-phase scan engine. Phase one probes account roots; accounts whose
//! root does not resolve are dropped wholesale. Phase two probes the role
//! candidates of every admitted account. Both phases consult the durable
//! cache first (unless forced), dispatch the rest onto a single work channel
//! shared by every plugin worker, and stream observations back to the
//! caller as they land.

use std::{collections::BTreeMap, sync::Arc};

use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    arn::PrincipalArn,
    cache::{PrincipalStatus, ScanStore},
    expand::ScanSet,
    plugins::{Plugin, ProbeError},
    rate_limit::RateLimiter,
};

/// One observed result: the principal either resolves or it does not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanOutcome {
    pub arn: PrincipalArn,
    pub exists: bool,
}

pub struct ScanEngine {
    plugins: Vec<Arc<dyn Plugin>>,
    store: Arc<ScanStore>,
    limiter: RateLimiter,
    force: bool,
}

impl ScanEngine {
    pub fn new(
        plugins: Vec<Arc<dyn Plugin>>,
        store: Arc<ScanStore>,
        limiter: RateLimiter,
        force: bool,
    ) -> Self {
        ScanEngine {
            plugins,
            store,
            limiter,
            force,
        }
    }

    /// Drive a full scan of `scan_set`. The returned channel yields outcomes
    /// in no particular order and closes once the work channel is drained
    /// and every worker has returned. Dropping the receiver stops the scan.
    pub fn scan(
        self,
        scan_set: &ScanSet,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<ScanOutcome> {
        let (out_tx, out_rx) = mpsc::channel(1024);
        let candidates = scan_set.arns();
        tokio::spawn(run(self, candidates, cancel, out_tx));
        out_rx
    }
}

struct AccountGroup {
    root: PrincipalArn,
    members: Vec<PrincipalArn>,
}

/// Group candidates by their literal account id; each group is keyed to the
/// account's root principal regardless of whether the input listed it.
fn group_by_account(candidates: &[PrincipalArn]) -> BTreeMap<String, AccountGroup> {
    let mut groups: BTreeMap<String, AccountGroup> = BTreeMap::new();
    for arn in candidates {
        let account_id = arn.account_id().to_string();
        let group = groups.entry(account_id).or_insert_with(|| AccountGroup {
            root: arn.to_root(),
            members: Vec::new(),
        });
        if !arn.is_root() {
            group.members.push(arn.clone());
        }
    }
    groups
}

async fn run(
    engine: ScanEngine,
    candidates: Vec<PrincipalArn>,
    cancel: CancellationToken,
    out_tx: mpsc::Sender<ScanOutcome>,
) {
    let ScanEngine {
        plugins,
        store,
        limiter,
        force,
    } = engine;

    // Workers get their own child token so a consumer that stops iterating
    // can shut them down without touching the rest of the process tree.
    let worker_cancel = cancel.child_token();
    let (work_tx, work_rx) = async_channel::unbounded::<PrincipalArn>();
    let (probe_tx, mut probe_rx) =
        mpsc::unbounded_channel::<(PrincipalArn, Result<bool, ProbeError>)>();

    let mut workers = JoinSet::new();
    for plugin in plugins {
        workers.spawn(worker(
            plugin,
            work_rx.clone(),
            probe_tx.clone(),
            limiter.clone(),
            worker_cancel.clone(),
        ));
    }
    drop(probe_tx);
    drop(work_rx);

    // Phase 1: roots. Known-absent accounts drop out with all their members;
    // known-present accounts admit their members straight to phase 2.
    let groups = group_by_account(&candidates);
    let mut admitted: Vec<PrincipalArn> = Vec::new();
    let mut dispatched = 0usize;

    for group in groups.values() {
        let status = if force {
            PrincipalStatus::Unknown
        } else {
            store.status(&group.root)
        };
        match status {
            PrincipalStatus::Absent => {
                if !emit(&out_tx, &group.root, false, &worker_cancel).await {
                    finish(work_tx, workers).await;
                    return;
                }
            }
            PrincipalStatus::Exists => {
                admitted.extend(group.members.iter().cloned());
                if !emit(&out_tx, &group.root, true, &worker_cancel).await {
                    finish(work_tx, workers).await;
                    return;
                }
            }
            PrincipalStatus::Unknown => {
                if work_tx.send(group.root.clone()).await.is_ok() {
                    dispatched += 1;
                }
            }
        }
    }

    let mut received = 0usize;
    while received < dispatched {
        let observation = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            observation = probe_rx.recv() => observation,
        };
        let Some((arn, result)) = observation else {
            break;
        };
        received += 1;
        match result {
            Ok(exists) => {
                store.set(&arn, exists);
                if exists {
                    if let Some(group) = groups.get(arn.account_id()) {
                        admitted.extend(group.members.iter().cloned());
                    }
                }
                if !emit(&out_tx, &arn, exists, &worker_cancel).await {
                    finish(work_tx, workers).await;
                    return;
                }
            }
            Err(err) => warn!("probe failed, leaving {arn} uncached: {err}"),
        }
    }

    if cancel.is_cancelled() {
        finish(work_tx, workers).await;
        return;
    }

    // Phase 2: members of admitted accounts.
    debug!(members = admitted.len(), "admitted to member phase");
    dispatched = 0;
    for arn in admitted {
        let status = if force {
            PrincipalStatus::Unknown
        } else {
            store.status(&arn)
        };
        match status {
            PrincipalStatus::Unknown => {
                if work_tx.send(arn).await.is_ok() {
                    dispatched += 1;
                }
            }
            known => {
                let exists = known == PrincipalStatus::Exists;
                if !emit(&out_tx, &arn, exists, &worker_cancel).await {
                    finish(work_tx, workers).await;
                    return;
                }
            }
        }
    }

    received = 0;
    while received < dispatched {
        let observation = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            observation = probe_rx.recv() => observation,
        };
        let Some((arn, result)) = observation else {
            break;
        };
        received += 1;
        match result {
            Ok(exists) => {
                store.set(&arn, exists);
                if !emit(&out_tx, &arn, exists, &worker_cancel).await {
                    finish(work_tx, workers).await;
                    return;
                }
            }
            Err(err) => warn!("probe failed, leaving {arn} uncached: {err}"),
        }
    }

    finish(work_tx, workers).await;
}

/// Yield one outcome. Returns false when the consumer stopped iterating, at
/// which point the caller shuts the workers down.
async fn emit(
    out_tx: &mpsc::Sender<ScanOutcome>,
    arn: &PrincipalArn,
    exists: bool,
    worker_cancel: &CancellationToken,
) -> bool {
    let outcome = ScanOutcome {
        arn: arn.clone(),
        exists,
    };
    if out_tx.send(outcome).await.is_err() {
        debug!("consumer stopped, cancelling workers");
        worker_cancel.cancel();
        return false;
    }
    true
}

/// Close the work channel and wait for every worker to return so no probe
/// task outlives the results stream.
async fn finish(work_tx: async_channel::Sender<PrincipalArn>, mut workers: JoinSet<()>) {
    drop(work_tx);
    while workers.join_next().await.is_some() {}
}

async fn worker(
    plugin: Arc<dyn Plugin>,
    work_rx: async_channel::Receiver<PrincipalArn>,
    probe_tx: mpsc::UnboundedSender<(PrincipalArn, Result<bool, ProbeError>)>,
    limiter: RateLimiter,
    cancel: CancellationToken,
) {
    loop {
        let arn = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            arn = work_rx.recv() => match arn {
                Ok(arn) => arn,
                Err(_) => break,
            },
        };

        // One token per probe, shared globally across every worker.
        let token = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            token = limiter.acquire() => token,
        };
        if token.is_err() {
            break;
        }

        let result = plugin.scan_arn(&arn).await;
        if let Ok(exists) = &result {
            debug!(plugin = %plugin.name(), %arn, exists, "probe complete");
        }
        if probe_tx.send((arn, result)).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(account: &str, name: &str) -> PrincipalArn {
        PrincipalArn::role(account, name)
    }

    #[test]
    fn grouping_keys_on_literal_account_id() {
        let candidates = vec![
            role("123456789012", "a"),
            role("123456789012", "b"),
            PrincipalArn::root("123456789012"),
            role("123456789013", "a"),
        ];
        let groups = group_by_account(&candidates);
        assert_eq!(groups.len(), 2);

        let first = &groups["123456789012"];
        assert_eq!(first.root, PrincipalArn::root("123456789012"));
        assert_eq!(first.members.len(), 2);

        let second = &groups["123456789013"];
        assert_eq!(second.root, PrincipalArn::root("123456789013"));
        assert_eq!(second.members, vec![role("123456789013", "a")]);
    }

    #[test]
    fn grouping_creates_roots_even_when_unlisted() {
        let groups = group_by_account(&[role("123456789012", "a")]);
        assert_eq!(groups["123456789012"].root, PrincipalArn::root("123456789012"));
    }
}
