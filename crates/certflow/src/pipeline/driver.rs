use crate::error::{ClassifiedError, ErrorContext, OperationError};
use crate::numbering::{NumberingService, SequenceAssignment, SequenceStore};
use crate::pipeline::{GenerationJob, RenderBackend, RenderedDocument};
use crate::progress::{Metadata, ProgressTracker, SessionId, SessionStatus, Stage};
use crate::retry::{RetryExecutor, SleepProvider, TokioSleep};
use core::future::Future;
use serde_json::{Value, json};
use std::sync::Arc;

/// A successfully generated certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedCertificate {
    pub number: SequenceAssignment,
    pub document: RenderedDocument,
    pub download_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed(GeneratedCertificate),
    /// The session was cancelled or evicted between two stages.
    Cancelled,
}

/// Drives one generation through every stage, reporting to a
/// [`ProgressTracker`].
///
/// Backend and store calls run under the [`RetryExecutor`]. The certificate
/// number is minted once, during `data_validation`; the transaction id is
/// used as idempotency key so a retried step replays the same number.
/// Cancellation is honoured between stages, never mid-call.
pub struct GenerationPipeline<B, S, P = TokioSleep> {
    tracker: ProgressTracker,
    numbering: Arc<NumberingService<S, P>>,
    retry: RetryExecutor<P>,
    backend: B,
}

impl<B, S, P> GenerationPipeline<B, S, P>
where
    B: RenderBackend,
    S: SequenceStore,
    P: SleepProvider,
{
    pub fn new(
        tracker: ProgressTracker,
        numbering: Arc<NumberingService<S, P>>,
        retry: RetryExecutor<P>,
        backend: B,
    ) -> Self {
        Self {
            tracker,
            numbering,
            retry,
            backend,
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs `job` for an already started session.
    ///
    /// # Errors
    ///
    /// Returns the classified error of the failing stage after marking the
    /// session failed with its user message.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "info", skip_all, fields(session = %id, transaction_id = %job.transaction_id)))]
    pub async fn run(
        &self,
        id: &SessionId,
        job: &GenerationJob,
    ) -> Result<PipelineOutcome, ClassifiedError> {
        let id = id.as_str();

        if !self.enter(id, Stage::Initializing, "Preparing certificate generation") {
            return Ok(PipelineOutcome::Cancelled);
        }
        self.tracker
            .advance(id, Stage::Initializing, 100.0, "Generation initialized", None);

        if !self.enter(id, Stage::TemplateLoading, "Loading certificate template") {
            return Ok(PipelineOutcome::Cancelled);
        }
        let template = self
            .step(id, Stage::TemplateLoading, "load_template", job, |_| {
                self.backend.load_template(job)
            })
            .await?;
        self.tracker
            .advance(id, Stage::TemplateLoading, 100.0, "Template loaded", None);

        if !self.enter(id, Stage::DataValidation, "Validating certificate data") {
            return Ok(PipelineOutcome::Cancelled);
        }
        let mut request = job.numbering.clone();
        if request.idempotency_key.is_none() {
            request.idempotency_key = Some(job.transaction_id.clone());
        }
        let number = self
            .step(id, Stage::DataValidation, "issue_certificate_number", job, |_| {
                self.numbering.issue(&request, &job.user_id)
            })
            .await?;
        self.tracker.advance(
            id,
            Stage::DataValidation,
            100.0,
            "Certificate data validated",
            metadata([("certificateNumber", json!(number.certificate_number))]),
        );

        if !self.enter(id, Stage::PdfGeneration, "Rendering certificate") {
            return Ok(PipelineOutcome::Cancelled);
        }
        let document = self
            .step(id, Stage::PdfGeneration, "render_certificate", job, |_| {
                self.backend.render(&template, job, &number)
            })
            .await?;
        self.tracker.advance(
            id,
            Stage::PdfGeneration,
            100.0,
            "Certificate rendered",
            metadata([
                ("fileSize", json!(document.size_bytes())),
                ("checksum", json!(document.checksum)),
            ]),
        );

        if !self.enter(id, Stage::FilePreparation, "Preparing download") {
            return Ok(PipelineOutcome::Cancelled);
        }
        let download_url = self
            .step(id, Stage::FilePreparation, "prepare_download", job, |_| {
                self.backend.prepare(&document, job)
            })
            .await?;
        self.tracker.advance(
            id,
            Stage::FilePreparation,
            100.0,
            "Download prepared",
            metadata([("downloadUrl", json!(download_url))]),
        );

        if !self.enter(id, Stage::DownloadReady, "Finalizing") {
            return Ok(PipelineOutcome::Cancelled);
        }
        self.tracker.advance(
            id,
            Stage::DownloadReady,
            100.0,
            "Certificate ready for download",
            None,
        );
        self.tracker.complete(id, None);

        Ok(PipelineOutcome::Completed(GeneratedCertificate {
            number,
            document,
            download_url,
        }))
    }

    /// Reports the start of `stage`. Returns `false` if the session is gone
    /// or no longer live.
    fn enter(&self, id: &str, stage: Stage, message: &str) -> bool {
        let live = self
            .tracker
            .get_progress(id)
            .is_some_and(|s| matches!(s.status, SessionStatus::Pending | SessionStatus::InProgress));
        if live {
            self.tracker.advance(id, stage, 10.0, message, None);
        } else {
            #[cfg(feature = "tracing")]
            tracing::info!("Stopping before {stage}: session {id} is no longer live");
        }
        live
    }

    async fn step<T, F, Fut, E>(
        &self,
        id: &str,
        stage: Stage,
        operation: &'static str,
        job: &GenerationJob,
        attempt: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationError>,
    {
        let context = ErrorContext::new(operation)
            .with("sessionId", id)
            .with("transactionId", job.transaction_id.clone())
            .with("stage", stage.as_str());
        self.retry.run(&context, attempt).await.inspect_err(|err| {
            self.tracker.fail(id, stage, &err.user_message);
            self.tracker.advance(
                id,
                stage,
                0.0,
                err.user_message.clone(),
                metadata([
                    ("errorCode", json!(err.code)),
                    ("correlationId", json!(err.correlation_id)),
                ]),
            );
        })
    }
}

fn metadata<const N: usize>(entries: [(&str, Value); N]) -> Option<Metadata> {
    Some(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}
