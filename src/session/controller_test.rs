// ============================================================================
// Session Controller Tests
// ============================================================================

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use ffmpeg_relay::fake::FakeSpawner;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{EncoderSettings, SessionController};
use crate::session::{
    destination::DestinationDescriptor,
    error::SessionError,
    mode::SessionMode,
    types::{PushOutcome, SessionSnapshot, SessionStatus, StartRequest},
};

fn controller(spawner: &FakeSpawner) -> SessionController {
    controller_with(spawner, EncoderSettings::default())
}

fn controller_with(spawner: &FakeSpawner, settings: EncoderSettings) -> SessionController {
    SessionController::new(Arc::new(spawner.clone()), settings)
}

fn dests(urls: &[&str]) -> Vec<DestinationDescriptor> {
    urls.iter()
        .map(|u| DestinationDescriptor::url(*u).unwrap())
        .collect()
}

/// Next published snapshot matching `pred`.
async fn wait_for(
    rx: &mut broadcast::Receiver<SessionSnapshot>,
    pred: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let next = async {
        loop {
            match rx.recv().await {
                Ok(snapshot) if pred(&snapshot) => return snapshot,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("controller dropped"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), next)
        .await
        .expect("timed out waiting for a status transition")
}

async fn wait_for_status(
    rx: &mut broadcast::Receiver<SessionSnapshot>,
    status: SessionStatus,
) -> SessionSnapshot {
    wait_for(rx, |s| s.status == status).await
}

// ------------------------------------------------------------------------
// Validation
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_empty_destinations_always_invalid() {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);

    let requests = [
        StartRequest::relay("rtmp://src/in", vec![]),
        StartRequest::ingest(vec![]),
        StartRequest {
            source_locator: Some("rtmp://src/in".to_string()),
            destinations: vec![],
            mode_hint: None,
        },
    ];
    for request in requests {
        let result = controller.start(request).await;
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
    }
    assert_eq!(spawner.launch_count(), 0);
    assert_eq!(controller.status().await.status, SessionStatus::Idle);
}

#[tokio::test]
async fn test_relay_without_locator_invalid() {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);

    let result = controller
        .start(StartRequest::relay("", dests(&["rtmp://a/1"])))
        .await;
    assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
    assert_eq!(spawner.launch_count(), 0);
}

#[tokio::test]
async fn test_relay_goes_starting_then_live() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);
    let mut rx = controller.subscribe();

    let handle = controller
        .start(StartRequest::relay("x", dests(&["rtmp://a/1"])))
        .await?;
    assert_eq!(handle.mode, SessionMode::Relay);
    assert_eq!(handle.status, SessionStatus::Starting);

    let snapshot = wait_for_status(&mut rx, SessionStatus::Live).await;
    assert_eq!(snapshot.session_id.as_deref(), Some(handle.id.as_str()));
    assert_eq!(snapshot.source_url.as_deref(), Some("x"));
    assert_eq!(snapshot.destinations, 1);

    let process = spawner.last().unwrap();
    assert!(!process.has_stdin());
    assert!(process.command().args.contains(&"x".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_mode_inferred_from_locator() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);

    let handle = controller
        .start(StartRequest {
            source_locator: Some("rtmp://src/in".to_string()),
            destinations: dests(&["rtmp://a/1"]),
            mode_hint: None,
        })
        .await?;
    assert_eq!(handle.mode, SessionMode::Relay);

    let handle = controller
        .start(StartRequest {
            source_locator: None,
            destinations: dests(&["rtmp://a/1"]),
            mode_hint: None,
        })
        .await?;
    assert_eq!(handle.mode, SessionMode::Ingest);
    Ok(())
}

// ------------------------------------------------------------------------
// Stop and push without a session
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_stop_without_session_is_noop() {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);

    assert!(!controller.stop().await);
    assert!(!controller.stop().await);
    assert_eq!(controller.status().await.status, SessionStatus::Idle);
}

#[tokio::test]
async fn test_push_before_start_is_discarded() {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);

    for _ in 0..5 {
        assert_eq!(
            controller.push_chunk(Bytes::from_static(b"chunk")),
            PushOutcome::NoSession
        );
    }
    assert_eq!(spawner.launch_count(), 0);
    let status = controller.status().await;
    assert_eq!(status.chunks_accepted, 0);
    assert_eq!(status.chunks_dropped, 0);
}

#[tokio::test]
async fn test_relay_ignores_pushed_chunks() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);

    controller
        .start(StartRequest::relay("rtmp://src/in", dests(&["rtmp://a/1"])))
        .await?;
    assert_eq!(
        controller.push_chunk(Bytes::from_static(b"chunk")),
        PushOutcome::NoSession
    );
    Ok(())
}

// ------------------------------------------------------------------------
// Supersession
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_second_start_supersedes_first() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);

    controller
        .start(StartRequest::ingest(dests(&["rtmp://a/1"])))
        .await?;
    let second = controller
        .start(StartRequest::ingest(dests(&["rtmp://b/2"])))
        .await?;

    let processes = spawner.processes();
    assert_eq!(processes.len(), 2);
    assert!(processes[0].is_killed());
    assert!(!processes[1].is_killed());
    assert_eq!(spawner.overlapping_launches(), 0);

    let status = controller.status().await;
    assert_eq!(status.session_id.as_deref(), Some(second.id.as_str()));
    Ok(())
}

// relay then ingest: only ingest survives, relay encoder got the kill
#[tokio::test]
async fn test_relay_superseded_by_ingest() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);
    let mut rx = controller.subscribe();

    controller
        .start(StartRequest::relay("rtmp://src/in", dests(&["rtmp://a/1"])))
        .await?;
    let ingest = controller
        .start(StartRequest::ingest(dests(&["rtmp://b/2"])))
        .await?;

    let processes = spawner.processes();
    assert!(processes[0].is_killed());
    assert_eq!(spawner.overlapping_launches(), 0);

    let snapshot = wait_for(&mut rx, |s| {
        s.status == SessionStatus::Live && s.mode == Some(SessionMode::Ingest)
    })
    .await;
    assert_eq!(snapshot.session_id.as_deref(), Some(ingest.id.as_str()));

    // the relay encoder's late exit must not touch the new session
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = controller.status().await;
    assert_eq!(status.status, SessionStatus::Live);
    assert_eq!(status.session_id.as_deref(), Some(ingest.id.as_str()));
    assert!(spawner.last().unwrap().is_alive());
    Ok(())
}

// ------------------------------------------------------------------------
// Ingest end-to-end
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_ingest_chunks_reach_encoder_in_order() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);
    let mut rx = controller.subscribe();

    let handle = controller
        .start(StartRequest::ingest(dests(&["rtmp://a/1", "rtmp://b/2"])))
        .await?;
    assert_eq!(handle.mode, SessionMode::Ingest);
    wait_for_status(&mut rx, SessionStatus::Live).await;

    let process = spawner.last().unwrap();
    assert!(process.has_stdin());
    let tee = process.command().args.last().unwrap().clone();
    assert!(tee.contains("rtmp://a/1") && tee.contains("rtmp://b/2"));

    let mut expected = Vec::new();
    for i in 0..10u8 {
        let chunk = vec![i; 16];
        expected.extend_from_slice(&chunk);
        assert_eq!(controller.push_chunk(Bytes::from(chunk)), PushOutcome::Accepted);
    }
    assert_eq!(process.read_input(expected.len()).await?, expected);
    assert_eq!(controller.status().await.chunks_accepted, 10);

    assert!(controller.stop().await);
    assert_eq!(
        wait_for(&mut rx, |_| true).await.status,
        SessionStatus::Stopping
    );
    assert_eq!(wait_for(&mut rx, |_| true).await.status, SessionStatus::Idle);
    assert!(process.is_killed());
    let rest = tokio::time::timeout(Duration::from_secs(2), process.read_input_to_end()).await??;
    assert!(rest.is_empty());

    let status = controller.status().await;
    assert_eq!(status.status, SessionStatus::Idle);
    assert_eq!(
        controller.push_chunk(Bytes::from_static(b"late")),
        PushOutcome::NoSession
    );
    Ok(())
}

#[tokio::test]
async fn test_full_conduit_drops_chunks() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let controller = controller_with(
        &spawner,
        EncoderSettings {
            conduit_depth: 2,
            ..EncoderSettings::default()
        },
    );

    controller
        .start(StartRequest::ingest(dests(&["rtmp://a/1"])))
        .await?;

    // nobody reads the fake stdin, so the pipe and then the conduit fill up
    let mut dropped = 0;
    for _ in 0..20 {
        if controller.push_chunk(Bytes::from(vec![0u8; 64 * 1024])) == PushOutcome::Dropped {
            dropped += 1;
        }
    }
    assert!(dropped > 0);
    assert_eq!(controller.status().await.chunks_dropped, dropped);
    Ok(())
}

// ------------------------------------------------------------------------
// Failures
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_runtime_failure_returns_to_idle() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);
    let mut rx = controller.subscribe();

    controller
        .start(StartRequest::ingest(dests(&["rtmp://a/1"])))
        .await?;
    wait_for_status(&mut rx, SessionStatus::Live).await;

    spawner
        .last()
        .unwrap()
        .fail(1, "rtmp://a/1: Connection refused")
        .await?;

    let snapshot = wait_for_status(&mut rx, SessionStatus::Idle).await;
    let error = snapshot.last_error.unwrap_or_default();
    assert!(error.contains("Connection refused"), "{}", error);
    assert_eq!(
        controller.push_chunk(Bytes::from_static(b"chunk")),
        PushOutcome::NoSession
    );

    // no retry
    assert_eq!(spawner.launch_count(), 1);
    assert!(!controller.stop().await);
    Ok(())
}

#[tokio::test]
async fn test_encoder_exit_returns_to_idle() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);
    let mut rx = controller.subscribe();

    controller
        .start(StartRequest::relay("rtmp://src/in", dests(&["rtmp://a/1"])))
        .await?;
    wait_for_status(&mut rx, SessionStatus::Live).await;

    spawner.last().unwrap().exit(0);
    let snapshot = wait_for_status(&mut rx, SessionStatus::Idle).await;
    assert!(snapshot.last_error.is_none());
    Ok(())
}

#[tokio::test]
async fn test_launch_failure_leaves_nothing_running() {
    let spawner = FakeSpawner::refusing();
    let controller = controller(&spawner);

    let result = controller
        .start(StartRequest::ingest(dests(&["rtmp://a/1"])))
        .await;
    assert!(matches!(result, Err(SessionError::LaunchFailure(_))));

    let status = controller.status().await;
    assert_eq!(status.status, SessionStatus::Idle);
    assert!(status.last_error.is_some());
    assert_eq!(
        controller.push_chunk(Bytes::from_static(b"chunk")),
        PushOutcome::NoSession
    );
    assert!(!controller.stop().await);
}

#[tokio::test]
async fn test_successful_start_clears_last_error() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);
    let mut rx = controller.subscribe();

    controller
        .start(StartRequest::ingest(dests(&["rtmp://a/1"])))
        .await?;
    wait_for_status(&mut rx, SessionStatus::Live).await;
    spawner.last().unwrap().fail(1, "boom").await?;
    let snapshot = wait_for_status(&mut rx, SessionStatus::Idle).await;
    assert!(snapshot.last_error.is_some());

    controller
        .start(StartRequest::ingest(dests(&["rtmp://a/1"])))
        .await?;
    assert!(controller.status().await.last_error.is_none());
    Ok(())
}

#[tokio::test]
async fn test_failure_is_published_before_idle() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let controller = controller(&spawner);
    let mut rx = controller.subscribe();

    controller
        .start(StartRequest::ingest(dests(&["rtmp://a/1"])))
        .await?;
    wait_for_status(&mut rx, SessionStatus::Live).await;
    spawner.last().unwrap().fail(1, "boom").await?;

    let failed = wait_for(&mut rx, |_| true).await;
    assert_eq!(failed.status, SessionStatus::Failed);
    assert!(failed.last_error.as_deref().unwrap_or_default().contains("boom"));
    assert!(failed.failed_at.is_some());

    let idle = wait_for(&mut rx, |_| true).await;
    assert_eq!(idle.status, SessionStatus::Idle);
    assert_eq!(idle.failed_at, failed.failed_at);

    // polling keeps the failure marker
    let status = controller.status().await;
    assert_eq!(status.status, SessionStatus::Idle);
    assert_eq!(status.failed_at, failed.failed_at);

    controller
        .start(StartRequest::ingest(dests(&["rtmp://a/1"])))
        .await?;
    assert!(controller.status().await.failed_at.is_none());
    Ok(())
}
