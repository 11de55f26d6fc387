//! End-to-end runs of the orchestrator against the scripted scanning service,
//! on tokio's paused clock.

mod common;

use common::*;
use scan_orchestrator::client::JobStatus;
use scan_orchestrator::config::OrchestratorConfig;
use scan_orchestrator::database::SnapshotStore;
use scan_orchestrator::error::{OrchestrationError, ToolError};
use scan_orchestrator::models::{ProcessSnapshot, ProcessStep};
use scan_orchestrator::orchestration::{StatusVerdict, TriggerOutcome};
use scan_orchestrator::state_machine::{ProcessState, StepName, StepState};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_full_pipeline_reaches_success() {
    let harness = TestHarness::new(ScriptedFossology::new());
    harness.add_payload("R1", 3 * MB);

    let outcome = harness
        .orchestrator
        .run_process("R1", false, Some("release 1.0".to_string()))
        .await
        .unwrap();
    assert!(outcome.is_accepted());

    let report = harness.wait_until_settled("R1").await;
    assert_eq!(report.verdict, StatusVerdict::Success);

    let snapshot = report.snapshot.unwrap();
    assert!(snapshot.is_complete());
    assert_eq!(snapshot.status, ProcessState::Done);
    assert_eq!(snapshot.generation, 1);
    assert_eq!(harness.attachments.reports("R1").len(), 1);
    assert!(harness.attachments.reports("R1")[0].filename.ends_with("-SPDX.rdf"));

    let calls = harness.api.calls();
    assert_eq!(calls.uploads, 1);
    assert_eq!(calls.unpack_polls, 1);
    assert_eq!(calls.scans_started, 1);
    assert_eq!(calls.reports_started, 1);
    assert_eq!(calls.downloads, 1);
    assert_eq!(harness.orchestrator.active_runs(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_attachment_is_rejected_synchronously() {
    let harness = TestHarness::new(ScriptedFossology::new());

    let err = harness
        .orchestrator
        .run_process("R2", false, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::AttachmentCount { count: 0, .. }
    ));
    assert!(err.is_validation());
    assert!(err.to_string().contains("has 0"));
    assert_eq!(harness.api.calls().connection_checks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_two_attachments_are_rejected() {
    let harness = TestHarness::new(ScriptedFossology::new());
    harness.add_payload("R2", MB);
    harness.add_payload("R2", MB);

    let err = harness
        .orchestrator
        .run_process("R2", false, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::AttachmentCount { count: 2, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_tool_spawns_nothing() {
    let harness = TestHarness::new(ScriptedFossology::with_script(Script {
        connected: false,
        ..Script::default()
    }));
    harness.add_payload("R1", MB);

    let err = harness
        .orchestrator
        .run_process("R1", false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::ExternalServiceUnavailable(_)));
    assert_eq!(harness.orchestrator.active_runs(), 0);
    assert_eq!(harness.api.calls().uploads, 0);
}

#[tokio::test(start_paused = true)]
async fn test_eleventh_trigger_is_rejected_at_capacity() {
    let harness = TestHarness::new(ScriptedFossology::with_script(Script {
        unpack_default: JobStatus::Processing,
        ..Script::default()
    }));

    let resources: Vec<String> = (1..=10).map(|i| format!("R{i}")).collect();
    for resource in &resources {
        harness.add_payload(resource, 3 * MB);
        let outcome = harness
            .orchestrator
            .run_process(resource, false, None)
            .await
            .unwrap();
        assert!(outcome.is_accepted(), "{resource} should be accepted");
    }
    assert_eq!(harness.orchestrator.active_runs(), 10);

    harness.add_payload("R11", 3 * MB);
    let outcome = harness
        .orchestrator
        .run_process("R11", false, None)
        .await
        .unwrap();
    assert_eq!(outcome, TriggerOutcome::TooManyRequests);
    assert!(!harness.orchestrator.registry().is_locked("R11"));

    // the ten runs are unaffected
    harness.api.update(|script| script.unpack_default = JobStatus::Completed);
    for resource in &resources {
        let report = harness.wait_until_settled(resource).await;
        assert_eq!(report.verdict, StatusVerdict::Success, "{resource}");
    }
    assert_eq!(harness.orchestrator.active_runs(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_second_trigger_for_running_resource_is_busy() {
    let harness = TestHarness::new(ScriptedFossology::with_script(Script {
        unpack_default: JobStatus::Processing,
        ..Script::default()
    }));
    harness.add_payload("R1", MB);

    let first = harness
        .orchestrator
        .run_process("R1", false, None)
        .await
        .unwrap();
    let second = harness
        .orchestrator
        .run_process("R1", true, None)
        .await
        .unwrap();
    assert!(first.is_accepted());
    assert_eq!(second, TriggerOutcome::Busy);

    let status = harness.orchestrator.check_status("R1").await.unwrap();
    assert_eq!(status.verdict, StatusVerdict::Processing);

    harness.api.update(|script| script.unpack_default = JobStatus::Completed);
    let report = harness.wait_until_settled("R1").await;
    assert_eq!(report.verdict, StatusVerdict::Success);
    assert_eq!(harness.api.calls().uploads, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unpack_exhaustion_halts_silently() {
    let harness = TestHarness::new(ScriptedFossology::with_script(Script {
        unpack_default: JobStatus::Processing,
        ..Script::default()
    }));
    harness.add_payload("R1", 3 * MB);

    let started = tokio::time::Instant::now();
    harness
        .orchestrator
        .run_process("R1", false, None)
        .await
        .unwrap();
    let report = harness.wait_until_settled("R1").await;

    assert_eq!(report.verdict, StatusVerdict::Failure);
    assert_eq!(harness.api.calls().unpack_polls, 15);
    assert_eq!(harness.api.calls().scans_started, 0);
    assert!(!harness.orchestrator.registry().is_locked("R1"));
    // 15 waits of 10s for a 3MB payload
    assert!(started.elapsed() >= Duration::from_secs(150));

    let snapshot = report.snapshot.unwrap();
    assert!(snapshot.step(StepName::Upload).unwrap().is_successful());
    assert!(snapshot.step(StepName::Scan).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_halted_run_resumes_on_next_trigger() {
    let harness = TestHarness::new(ScriptedFossology::with_script(Script {
        unpack_default: JobStatus::Processing,
        ..Script::default()
    }));
    harness.add_payload("R1", MB);

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    assert_eq!(
        harness.wait_until_settled("R1").await.verdict,
        StatusVerdict::Failure
    );

    harness.api.update(|script| script.unpack_default = JobStatus::Completed);
    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    assert_eq!(
        harness.wait_until_settled("R1").await.verdict,
        StatusVerdict::Success
    );

    // upload is not repeated
    assert_eq!(harness.api.calls().uploads, 1);
    assert_eq!(harness.api.calls().upload_lookups, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_unpack_errors_are_retried() {
    let mut script = Script::default();
    script.unpack.push_back(Err(ToolError::api_error(503, "busy")));
    script.unpack.push_back(Err(ToolError::api_error(503, "busy")));
    script.unpack.push_back(Ok(JobStatus::Processing));
    let harness = TestHarness::new(ScriptedFossology::with_script(script));
    harness.add_payload("R1", MB);

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    let report = harness.wait_until_settled("R1").await;

    assert_eq!(report.verdict, StatusVerdict::Success);
    assert_eq!(harness.api.calls().unpack_polls, 4);
}

#[tokio::test(start_paused = true)]
async fn test_unpack_failure_stops_the_chain() {
    let mut script = Script::default();
    script.unpack.push_back(Ok(JobStatus::Failed));
    let harness = TestHarness::new(ScriptedFossology::with_script(script));
    harness.add_payload("R1", MB);

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    let report = harness.wait_until_settled("R1").await;

    assert_eq!(report.verdict, StatusVerdict::Failure);
    assert_eq!(harness.api.calls().unpack_polls, 1);
    assert_eq!(harness.api.calls().scans_started, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_scan_stops_before_report() {
    let mut script = Script::default();
    script.scan.push_back((JobStatus::Failed, None));
    script.scan.push_back((JobStatus::Failed, None));
    let harness = TestHarness::new(ScriptedFossology::with_script(script));
    harness.add_payload("R1", MB);

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    let report = harness.wait_until_settled("R1").await;

    assert_eq!(report.verdict, StatusVerdict::Failure);
    assert_eq!(harness.api.calls().reports_started, 0);
    let scan = report.snapshot.unwrap();
    let scan = scan.step(StepName::Scan).unwrap();
    assert!(scan.is_triggered());
    assert!(!scan.is_successful());
}

#[tokio::test(start_paused = true)]
async fn test_scan_eta_is_clamped() {
    let mut script = Script::default();
    script
        .scan
        .push_back((JobStatus::Processing, Some(Duration::from_secs(86_400))));
    let harness = TestHarness::new(ScriptedFossology::with_script(script));
    harness.add_payload("R1", MB);

    let started = tokio::time::Instant::now();
    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    let report = harness.wait_until_settled("R1").await;

    assert_eq!(report.verdict, StatusVerdict::Success);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(600), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(3_600), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_report_not_ready_is_polled_again() {
    let harness = TestHarness::new(ScriptedFossology::with_script(Script {
        report_not_ready: 2,
        ..Script::default()
    }));
    harness.add_payload("R1", MB);

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    let report = harness.wait_until_settled("R1").await;

    assert_eq!(report.verdict, StatusVerdict::Success);
    assert_eq!(harness.api.calls().downloads, 3);
    assert_eq!(harness.api.calls().reports_started, 1);
}

#[tokio::test(start_paused = true)]
async fn test_completed_resource_is_not_triggered_again() {
    let harness = TestHarness::new(ScriptedFossology::new());
    harness.add_payload("R1", MB);

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    assert_eq!(
        harness.wait_until_settled("R1").await.verdict,
        StatusVerdict::Success
    );
    let before = harness.api.calls();

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    let report = harness.wait_until_settled("R1").await;
    assert_eq!(report.verdict, StatusVerdict::Success);

    let after = harness.api.calls();
    assert_eq!(after.connection_checks, before.connection_checks + 1);
    assert_eq!(
        CallCounts {
            connection_checks: before.connection_checks,
            ..after
        },
        before
    );
}

#[tokio::test(start_paused = true)]
async fn test_force_outdated_restarts_with_new_generation() {
    let harness = TestHarness::new(ScriptedFossology::new());
    harness.add_payload("R1", MB);

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    harness.wait_until_settled("R1").await;

    harness.orchestrator.run_process("R1", true, None).await.unwrap();
    let report = harness.wait_until_settled("R1").await;

    assert_eq!(report.verdict, StatusVerdict::Success);
    assert_eq!(report.snapshot.unwrap().generation, 2);
    assert_eq!(harness.api.calls().uploads, 2);
    assert_eq!(harness.attachments.reports("R1").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_invalidation_aborts_and_releases_lock() {
    let harness = TestHarness::with_client(ScriptedFossology::new(), |inner| {
        Arc::new(FailingInvalidation { inner })
    });
    harness.add_payload("R1", MB);

    let outcome = harness
        .orchestrator
        .run_process("R1", true, None)
        .await
        .unwrap();
    assert!(outcome.is_accepted());

    let report = harness.wait_until_settled("R1").await;
    assert_eq!(report.verdict, StatusVerdict::Failure);
    assert!(report.snapshot.is_none());
    assert_eq!(harness.api.calls().uploads, 0);
    assert_eq!(harness.orchestrator.active_runs(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_during_run_supersedes_it() {
    let harness = TestHarness::new(ScriptedFossology::with_script(Script {
        unpack_default: JobStatus::Processing,
        ..Script::default()
    }));
    harness.add_payload("R1", MB);

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(25)).await;

    assert!(harness
        .orchestrator
        .mark_outdated("R1")
        .await
        .unwrap()
        .is_success());
    harness.api.update(|script| script.unpack_default = JobStatus::Completed);

    let report = harness.wait_until_settled("R1").await;
    assert_eq!(report.verdict, StatusVerdict::Failure);
    let snapshot = report.snapshot.unwrap();
    assert_eq!(snapshot.status, ProcessState::Outdated);
    assert_eq!(snapshot.generation, 1);
    assert_eq!(harness.api.calls().scans_started, 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_during_report_download_is_kept() {
    let harness = TestHarness::new(ScriptedFossology::with_script(Script {
        download_delay: Some(Duration::from_secs(60)),
        ..Script::default()
    }));
    harness.add_payload("R1", MB);

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    while harness.api.calls().downloads == 0 {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    // the handler call downloading the report loaded its snapshot before this
    assert!(harness
        .orchestrator
        .mark_outdated("R1")
        .await
        .unwrap()
        .is_success());
    assert_eq!(
        harness.store.load("R1").await.unwrap().unwrap().status,
        ProcessState::Outdated
    );

    let report = harness.wait_until_settled("R1").await;
    assert_eq!(report.verdict, StatusVerdict::Failure);
    let snapshot = report.snapshot.unwrap();
    assert_eq!(snapshot.status, ProcessState::Outdated);
    assert_eq!(snapshot.generation, 1);
    assert!(harness.attachments.reports("R1").is_empty());
    assert_eq!(harness.orchestrator.active_runs(), 0);

    // the next run restarts from upload instead of short-circuiting
    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    let report = harness.wait_until_settled("R1").await;
    assert_eq!(report.verdict, StatusVerdict::Success);
    assert_eq!(report.snapshot.unwrap().generation, 2);
    assert_eq!(harness.api.calls().uploads, 2);
    assert_eq!(harness.attachments.reports("R1").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_upload_recovers_on_next_run() {
    let harness = TestHarness::new(ScriptedFossology::new());
    let payload = harness.add_payload("R1", MB);

    let mut seeded = ProcessSnapshot::new("R1", 1);
    seeded.status = ProcessState::InWork;
    seeded.attachment_id = Some(payload.content_id.clone());
    seeded.attachment_hash = Some(payload.sha1.clone());
    let mut upload = ProcessStep::new(StepName::Upload);
    upload.status = StepState::InWork;
    seeded.steps.push(upload);
    harness.store.save(&seeded).await.unwrap();

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    let report = harness.wait_until_settled("R1").await;

    assert_eq!(report.verdict, StatusVerdict::Success);
    let snapshot = report.snapshot.unwrap();
    assert_eq!(snapshot.generation, 1);
    assert!(snapshot.step(StepName::Upload).unwrap().is_successful());
    assert_eq!(harness.api.calls().uploads, 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_report_download_ends_after_scan() {
    let mut config = OrchestratorConfig::default();
    config.tool.report_download_enabled = false;
    let harness = TestHarness::with_config(ScriptedFossology::new(), config);
    harness.add_payload("R1", MB);

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    let report = harness.wait_until_settled("R1").await;

    assert_eq!(report.verdict, StatusVerdict::Success);
    let snapshot = report.snapshot.unwrap();
    assert!(snapshot.step(StepName::Scan).unwrap().is_successful());
    assert!(snapshot.step(StepName::Report).is_none());
    assert_eq!(harness.api.calls().reports_started, 0);
    assert!(harness.attachments.reports("R1").is_empty());

    // an explicit trigger adds the report, the next run downloads it
    assert!(harness
        .handler
        .trigger_report_generation("R1")
        .await
        .unwrap()
        .is_success());
    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    let report = harness.wait_until_settled("R1").await;

    assert_eq!(report.verdict, StatusVerdict::Success);
    assert!(report.snapshot.unwrap().is_complete());
    assert_eq!(harness.attachments.reports("R1").len(), 1);
    assert_eq!(harness.api.calls().uploads, 1);
}

#[tokio::test(start_paused = true)]
async fn test_status_of_unknown_resource_is_failure() {
    let harness = TestHarness::new(ScriptedFossology::new());

    let report = harness.orchestrator.check_status("nope").await.unwrap();
    assert_eq!(report.verdict, StatusVerdict::Failure);
    assert!(report.snapshot.is_none());
    assert!(harness
        .orchestrator
        .mark_outdated("nope")
        .await
        .unwrap()
        .is_success());
}

#[tokio::test(start_paused = true)]
async fn test_upload_reuse_skips_upload() {
    let harness = TestHarness::new(ScriptedFossology::with_script(Script {
        existing_upload: Some("42".to_string()),
        ..Script::default()
    }));
    harness.add_payload("R1", MB);

    harness.orchestrator.run_process("R1", false, None).await.unwrap();
    let report = harness.wait_until_settled("R1").await;

    assert_eq!(report.verdict, StatusVerdict::Success);
    assert_eq!(harness.api.calls().uploads, 0);
    let snapshot = report.snapshot.unwrap();
    let upload = snapshot.step(StepName::Upload).unwrap();
    assert_eq!(upload.correlation_id.as_deref(), Some("42"));
    assert_eq!(upload.status, StepState::Done);
}
