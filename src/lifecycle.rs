//! Concurrent plugin provisioning and teardown. Both actions fan out across
//! the whole plugin pool under a fixed cap; setup aborts the run on the
//! first failure (including a panic inside a plugin), cleanup keeps going
//! and reports what it could not remove.

use std::sync::Arc;

use anyhow::anyhow;
use futures::FutureExt;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{info, warn};

use crate::{errors::ScanError, plugins::Plugin};

/// How many Setup/CleanUp calls run at once across all regions.
const FANOUT: usize = 40;

pub async fn setup_all(plugins: &[Arc<dyn Plugin>]) -> Result<(), ScanError> {
    let semaphore = Arc::new(Semaphore::new(FANOUT));
    let mut tasks = JoinSet::new();

    for plugin in plugins {
        let plugin = Arc::clone(plugin);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let name = plugin.name();
            info!("{name}: setting up");

            match std::panic::AssertUnwindSafe(plugin.setup())
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => Ok(name),
                Ok(Err(source)) => Err(ScanError::PluginSetup {
                    plugin: name,
                    source,
                }),
                Err(payload) => Err(ScanError::PluginSetup {
                    plugin: name,
                    source: anyhow!("setup panicked: {}", panic_message(&payload)),
                }),
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(name)) => info!("{name}: setup complete"),
            // Dropping the JoinSet aborts whatever is still in flight.
            Ok(Err(err)) => return Err(err),
            Err(join_err) => {
                return Err(ScanError::PluginSetup {
                    plugin: "setup worker".to_string(),
                    source: anyhow!("{join_err}"),
                })
            }
        }
    }
    Ok(())
}

pub async fn clean_up_all(plugins: &[Arc<dyn Plugin>]) {
    let semaphore = Arc::new(Semaphore::new(FANOUT));
    let mut tasks = JoinSet::new();

    for plugin in plugins {
        let plugin = Arc::clone(plugin);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let name = plugin.name();
            info!("{name}: cleaning up");
            if let Err(err) = plugin.clean_up().await {
                warn!("{name}: cleaning up: {err:#}");
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(join_err) = joined {
            warn!("cleanup worker failed: {join_err}");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use super::*;
    use crate::{arn::PrincipalArn, plugins::ProbeError};

    struct FlakyPlugin {
        name: &'static str,
        fail: bool,
        panic: bool,
        setups: AtomicUsize,
        cleanups: AtomicUsize,
    }

    impl FlakyPlugin {
        fn new(name: &'static str) -> Self {
            FlakyPlugin {
                name,
                fail: false,
                panic: false,
                setups: AtomicUsize::new(0),
                cleanups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Plugin for FlakyPlugin {
        fn name(&self) -> String {
            self.name.to_string()
        }

        async fn setup(&self) -> Result<()> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("provisioning exploded");
            }
            if self.fail {
                bail!("resource limit reached");
            }
            Ok(())
        }

        async fn scan_arn(&self, _arn: &PrincipalArn) -> Result<bool, ProbeError> {
            unreachable!("lifecycle tests never probe")
        }

        async fn clean_up(&self) -> Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("still in use");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn setup_runs_every_plugin() {
        let plugins: Vec<Arc<dyn Plugin>> = (0..50)
            .map(|_| Arc::new(FlakyPlugin::new("ok")) as Arc<dyn Plugin>)
            .collect();
        setup_all(&plugins).await.unwrap();
    }

    #[tokio::test]
    async fn setup_is_repeatable() {
        let plugin = Arc::new(FlakyPlugin::new("ok"));
        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::clone(&plugin) as Arc<dyn Plugin>];
        setup_all(&plugins).await.unwrap();
        setup_all(&plugins).await.unwrap();
        assert_eq!(plugin.setups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn setup_failure_is_fatal_and_names_the_plugin() {
        let mut bad = FlakyPlugin::new("sqs-us-east-1-0");
        bad.fail = true;
        let plugins: Vec<Arc<dyn Plugin>> =
            vec![Arc::new(FlakyPlugin::new("ok")), Arc::new(bad)];

        let err = setup_all(&plugins).await.unwrap_err();
        match err {
            ScanError::PluginSetup { plugin, .. } => assert_eq!(plugin, "sqs-us-east-1-0"),
            other => panic!("expected PluginSetup, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn setup_panic_surfaces_as_an_error() {
        let mut bad = FlakyPlugin::new("sns-us-east-1-1");
        bad.panic = true;
        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(bad)];

        let err = setup_all(&plugins).await.unwrap_err();
        match err {
            ScanError::PluginSetup { plugin, source } => {
                assert_eq!(plugin, "sns-us-east-1-1");
                assert!(source.to_string().contains("provisioning exploded"));
            }
            other => panic!("expected PluginSetup, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cleanup_tolerates_failures() {
        let mut bad = FlakyPlugin::new("bad");
        bad.fail = true;
        let ok = Arc::new(FlakyPlugin::new("ok"));
        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::clone(&ok) as Arc<dyn Plugin>, Arc::new(bad)];

        clean_up_all(&plugins).await;
        assert_eq!(ok.cleanups.load(Ordering::SeqCst), 1);
    }
}
