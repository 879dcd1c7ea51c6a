use super::*;
use crate::config::{NumberingConfig, TrackerConfig};
use crate::error::{ErrorCategory, OperationError};
use crate::numbering::{
    MemorySequenceStore, NumberingRequest, NumberingService, SequenceAssignment, SequenceKey,
};
use crate::progress::{ProgressTracker, SessionId, SessionStatus, Stage, StageStatus, StartOptions};
use crate::retry::{RetryExecutor, RetryPolicy, TokioYield};
use core::future::Future;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Default)]
struct FakeBackend {
    template_error: Option<ErrorCategory>,
    render_failures: AtomicU32,
    loads: AtomicU32,
    renders: AtomicU32,
    cancel_on_load: Mutex<Option<(ProgressTracker, SessionId)>>,
}

impl RenderBackend for FakeBackend {
    type Template = String;

    fn load_template(
        &self,
        job: &GenerationJob,
    ) -> impl Future<Output = Result<Self::Template, OperationError>> + Send {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some((tracker, id)) = self.cancel_on_load.lock().take() {
            tracker.cancel(id.as_str());
        }
        let result = match self.template_error {
            Some(category) => Err(OperationError::categorized(
                category,
                format!("template {} is malformed", job.template_id),
            )),
            None => Ok(format!("<h1>{}</h1>", job.template_id)),
        };
        core::future::ready(result)
    }

    fn render(
        &self,
        template: &Self::Template,
        _job: &GenerationJob,
        number: &SequenceAssignment,
    ) -> impl Future<Output = Result<RenderedDocument, OperationError>> + Send {
        self.renders.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .render_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let result = if fail {
            Err(OperationError::raw("network connection reset by renderer"))
        } else {
            Ok(RenderedDocument {
                bytes: format!("{template}{}", number.certificate_number).into_bytes(),
                content_type: "application/pdf".into(),
                checksum: "abc123".into(),
            })
        };
        core::future::ready(result)
    }

    fn prepare(
        &self,
        _document: &RenderedDocument,
        job: &GenerationJob,
    ) -> impl Future<Output = Result<String, OperationError>> + Send {
        core::future::ready(Ok(format!("https://files/{}.pdf", job.transaction_id)))
    }
}

type Pipeline = GenerationPipeline<FakeBackend, MemorySequenceStore, TokioYield>;

fn pipeline(backend: FakeBackend) -> (Pipeline, MemorySequenceStore) {
    let store = MemorySequenceStore::default();
    let numbering = Arc::new(NumberingService::<_, TokioYield>::new(
        Arc::new(store.clone()),
        NumberingConfig::default(),
    ));
    let pipeline = GenerationPipeline::new(
        ProgressTracker::new(TrackerConfig::default()),
        numbering,
        RetryExecutor::<TokioYield>::new(RetryPolicy::default().with_max_attempts(3)),
        backend,
    );
    (pipeline, store)
}

fn job() -> GenerationJob {
    GenerationJob {
        transaction_id: "tx-1".into(),
        user_id: "user-1".into(),
        template_id: "share".into(),
        numbering: NumberingRequest::new("ent-1", 2025),
        ..GenerationJob::default()
    }
}

#[tokio::test]
async fn completes_every_stage() {
    let (pipeline, store) = pipeline(FakeBackend::default());
    let tracker = pipeline.tracker().clone();
    let id = tracker.start("tx-1", "user-1", StartOptions::default());

    let outcome = pipeline.run(&id, &job()).await.unwrap();
    let PipelineOutcome::Completed(cert) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(cert.number.certificate_number, "2025-0001");
    assert_eq!(cert.download_url, "https://files/tx-1.pdf");

    let session = tracker.get_progress(id.as_str()).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.overall_progress, 100);
    assert_eq!(session.metadata["certificateNumber"], json!("2025-0001"));
    assert_eq!(session.metadata["checksum"], json!("abc123"));
    assert_eq!(
        session.metadata["fileSize"],
        json!(cert.document.size_bytes())
    );
    assert_eq!(session.metadata["downloadUrl"], json!("https://files/tx-1.pdf"));
    assert_eq!(store.records(&SequenceKey::new("ent-1", 2025)).len(), 1);
}

#[tokio::test]
async fn transient_render_failures_are_retried() {
    let (pipeline, _) = pipeline(FakeBackend {
        render_failures: AtomicU32::new(2),
        ..FakeBackend::default()
    });
    let id = pipeline
        .tracker()
        .start("tx-1", "user-1", StartOptions::default());

    let outcome = pipeline.run(&id, &job()).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Completed(_)));
    assert_eq!(pipeline.backend().renders.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn template_errors_fail_the_session_without_retry() {
    let (pipeline, store) = pipeline(FakeBackend {
        template_error: Some(ErrorCategory::Template),
        ..FakeBackend::default()
    });
    let tracker = pipeline.tracker().clone();
    let id = tracker.start("tx-1", "user-1", StartOptions::default());

    let err = pipeline.run(&id, &job()).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::Template);
    assert!(!err.is_retryable);
    assert_eq!(pipeline.backend().loads.load(Ordering::SeqCst), 1);

    let session = tracker.get_progress(id.as_str()).unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.error.as_deref(), Some(err.user_message.as_str()));
    assert_eq!(
        session.stage_record(Stage::TemplateLoading).status,
        StageStatus::Failed
    );
    assert_eq!(session.metadata["errorCode"], json!("TEMPLATE_ERROR"));
    assert!(store.records(&SequenceKey::new("ent-1", 2025)).is_empty());
}

#[tokio::test]
async fn exhausted_retries_fail_at_the_render_stage() {
    let (pipeline, store) = pipeline(FakeBackend {
        render_failures: AtomicU32::new(5),
        ..FakeBackend::default()
    });
    let tracker = pipeline.tracker().clone();
    let id = tracker.start("tx-1", "user-1", StartOptions::default());

    let err = pipeline.run(&id, &job()).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::Network);
    assert_eq!(err.context.get("attempt"), Some(&json!(3)));

    let session = tracker.get_progress(id.as_str()).unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(
        session.stage_record(Stage::PdfGeneration).status,
        StageStatus::Failed
    );
    // The number stays issued.
    assert_eq!(store.records(&SequenceKey::new("ent-1", 2025)).len(), 1);
}

#[tokio::test]
async fn cancellation_stops_between_stages() {
    let (pipeline, store) = pipeline(FakeBackend::default());
    let tracker = pipeline.tracker().clone();
    let id = tracker.start("tx-1", "user-1", StartOptions::default());
    *pipeline.backend().cancel_on_load.lock() = Some((tracker.clone(), id.clone()));

    let outcome = pipeline.run(&id, &job()).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Cancelled);
    assert_eq!(
        tracker.get_progress(id.as_str()).unwrap().status,
        SessionStatus::Cancelled
    );
    assert!(store.records(&SequenceKey::new("ent-1", 2025)).is_empty());
}

#[tokio::test]
async fn cancelled_sessions_do_not_start() {
    let (pipeline, _) = pipeline(FakeBackend::default());
    let id = pipeline
        .tracker()
        .start("tx-1", "user-1", StartOptions::default());
    pipeline.tracker().cancel(id.as_str());

    assert_eq!(
        pipeline.run(&id, &job()).await.unwrap(),
        PipelineOutcome::Cancelled
    );
    assert_eq!(pipeline.backend().loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reruns_replay_the_same_number() {
    let (pipeline, store) = pipeline(FakeBackend::default());
    let tracker = pipeline.tracker().clone();

    let first = tracker.start("tx-1", "user-1", StartOptions::default());
    let second = tracker.start("tx-1", "user-1", StartOptions::default());
    let a = pipeline.run(&first, &job()).await.unwrap();
    let b = pipeline.run(&second, &job()).await.unwrap();

    let (PipelineOutcome::Completed(a), PipelineOutcome::Completed(b)) = (a, b) else {
        panic!("both runs should complete");
    };
    assert_eq!(a.number, b.number);
    assert_eq!(store.records(&SequenceKey::new("ent-1", 2025)).len(), 1);
}
