//! A controller that dies mid-bake is replaced by a fresh one reading the
//! same on-disk records.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use deployflow::cancellation::CancellationToken;
use deployflow::core::Color;
use deployflow::deployment::{DeploymentController, DeploymentPhase};
use deployflow::environment::SharedPair;
use deployflow::health::HealthStatus;
use deployflow::store::{DeploymentStore, FileDeploymentStore};
use deployflow::testing::{
    assert_pair_steady, canary_deployment, revision, steady_pair, FakeProvisioner,
    RecordingRouter, ScriptedHealthMonitor,
};

const MINUTE: Duration = Duration::from_secs(60);

fn controller(
    pair: &SharedPair,
    router: &Arc<RecordingRouter>,
    dir: &std::path::Path,
) -> DeploymentController {
    DeploymentController::new(
        canary_deployment(),
        pair.clone(),
        Arc::new(FakeProvisioner::ready()),
        router.clone(),
        Arc::new(ScriptedHealthMonitor::always(HealthStatus::Healthy)),
    )
    .unwrap()
    .with_store(Arc::new(FileDeploymentStore::new(dir)))
}

#[tokio::test(start_paused = true)]
async fn resumed_deployment_finishes_from_persisted_phase() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let pair = steady_pair(Some(revision("1")));
    let router = Arc::new(RecordingRouter::new());

    let first = Arc::new(controller(&pair, &router, dir.path()));
    let crashed = {
        let first = first.clone();
        tokio::spawn(async move { first.deploy(revision("2"), &CancellationToken::new()).await })
    };
    tokio::time::sleep(3 * MINUTE).await;
    crashed.abort();
    assert!(crashed.await.unwrap_err().is_cancelled());

    let store = FileDeploymentStore::new(dir.path());
    let in_flight = store.in_flight("nginx").await?;
    assert_eq!(in_flight.len(), 1);
    let persisted = &in_flight[0];
    assert_eq!(persisted.phase, DeploymentPhase::Baking);
    assert_eq!(persisted.steps_applied, 1);
    assert_eq!(pair.lock().owner(), Some(persisted.id.as_str()));

    let second = controller(&pair, &router, dir.path());
    let outcome = second
        .resume(&persisted.id, &CancellationToken::new())
        .await?;

    assert!(outcome.is_completed());
    assert_eq!(router.new_slot_weights(Color::Green), vec![10, 10, 100]);
    assert_pair_steady(&pair.lock());
    assert_eq!(pair.lock().active_color(), Color::Green);

    let stored = store
        .load(&persisted.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("record {} vanished", persisted.id))?;
    assert_eq!(stored.phase, DeploymentPhase::Completed);
    assert!(store.in_flight("nginx").await?.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn resume_after_restart_rebuilds_new_slot() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let router = Arc::new(RecordingRouter::new());

    let first = Arc::new(controller(&steady_pair(Some(revision("1"))), &router, dir.path()));
    let crashed = {
        let first = first.clone();
        tokio::spawn(async move { first.deploy(revision("2"), &CancellationToken::new()).await })
    };
    tokio::time::sleep(3 * MINUTE).await;
    crashed.abort();
    let _ = crashed.await;

    let persisted = FileDeploymentStore::new(dir.path())
        .in_flight("nginx")
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("no in-flight record"))?;

    let rebuilt = steady_pair(Some(revision("1")));
    let outcome = controller(&rebuilt, &router, dir.path())
        .resume(&persisted.id, &CancellationToken::new())
        .await?;

    assert!(outcome.is_completed());
    assert_pair_steady(&rebuilt.lock());
    let pair = rebuilt.lock();
    assert_eq!(pair.active_color(), Color::Green);
    assert_eq!(pair.slot(Color::Green).running_revision, Some(revision("2")));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn new_deploy_refused_while_persisted_record_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let pair = steady_pair(Some(revision("1")));
    let router = Arc::new(RecordingRouter::new());

    let first = Arc::new(controller(&pair, &router, dir.path()));
    let crashed = {
        let first = first.clone();
        tokio::spawn(async move { first.deploy(revision("2"), &CancellationToken::new()).await })
    };
    tokio::time::sleep(MINUTE).await;
    crashed.abort();
    let _ = crashed.await;

    let restarted = controller(&pair, &router, dir.path());
    let err = restarted
        .deploy(revision("3"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_invariant_violation());
    assert_eq!(router.new_slot_weights(Color::Green), vec![10]);
}
