use crate::error::OperationError;
use crate::numbering::{NumberingRequest, SequenceAssignment};
use crate::progress::Metadata;
use core::future::Future;
use serde::{Deserialize, Serialize};

/// Everything needed to generate one certificate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub transaction_id: String,
    pub user_id: String,
    pub template_id: String,
    pub numbering: NumberingRequest,
    /// Free-form merge data handed to the backend.
    #[serde(default)]
    pub data: Metadata,
}

/// A rendered certificate file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub checksum: String,
}

impl RenderedDocument {
    pub fn size_bytes(&self) -> u64 {
        u64::try_from(self.bytes.len()).unwrap_or(u64::MAX)
    }
}

/// The collaborator that turns a job into a downloadable file.
///
/// Failures are reported as [`OperationError`] so the pipeline can classify
/// and retry them: return [`OperationError::categorized`] when the category
/// is known, or a raw error to fall back on message heuristics.
pub trait RenderBackend: Send + Sync {
    type Template: Send + Sync;

    fn load_template(
        &self,
        job: &GenerationJob,
    ) -> impl Future<Output = Result<Self::Template, OperationError>> + Send;

    fn render(
        &self,
        template: &Self::Template,
        job: &GenerationJob,
        number: &SequenceAssignment,
    ) -> impl Future<Output = Result<RenderedDocument, OperationError>> + Send;

    /// Stores the document and returns where it can be downloaded from.
    fn prepare(
        &self,
        document: &RenderedDocument,
        job: &GenerationJob,
    ) -> impl Future<Output = Result<String, OperationError>> + Send;
}
