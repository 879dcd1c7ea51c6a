use crate::config::NumberingConfig;
use crate::error::{ClassifiedError, ErrorCategory, ErrorContext};
use crate::numbering::{
    NumberingRequest, SequenceAssignment, SequenceKey, SequenceRecord, SequenceStore,
    SequenceTransaction, StoreError, TtlCache, render_number, validate_number,
};
use crate::retry::{SleepProvider, TokioSleep};
use chrono::Utc;
use core::marker::PhantomData;
use std::sync::Arc;

/// Error code of the conflict error surfaced after the retry budget for store
/// write conflicts is spent.
pub const NUMBER_CONFLICT: &str = "NUMBER_CONFLICT";

type CacheKey = (SequenceKey, String);

enum IssueError {
    Store(StoreError),
    Invalid(ClassifiedError),
}

impl From<StoreError> for IssueError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Issues certificate numbers that are unique and strictly increasing per
/// `(entity, year)`.
///
/// Correctness rests entirely on the [`SequenceStore`]: every number is read
/// and written inside one store transaction, and write conflicts are retried a
/// bounded number of times with a linear back-off. The in-process cache only
/// replays a number already issued for the same idempotency key; it is never
/// consulted to compute a new sequence, so several instances of this service
/// may share one store.
///
/// Issued numbers are append-only. Nothing here un-issues a committed number.
pub struct NumberingService<S, P = TokioSleep> {
    store: Arc<S>,
    pub(super) cache: TtlCache<CacheKey, SequenceAssignment>,
    config: NumberingConfig,
    _sleep: PhantomData<fn() -> P>,
}

impl<S, P> NumberingService<S, P>
where
    S: SequenceStore,
    P: SleepProvider,
{
    pub fn new(store: Arc<S>, config: NumberingConfig) -> Self {
        Self {
            store,
            cache: TtlCache::new(config.cache_ttl),
            config,
            _sleep: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Issues the next number for the request's `(entity, year)` pair.
    ///
    /// # Errors
    ///
    /// - A validation error for malformed requests or templates, raised before
    ///   the store is touched.
    /// - A retryable database error with code [`NUMBER_CONFLICT`] when every
    ///   attempt hit a write conflict. Callers may ask again with `fresh` set.
    /// - A retryable database error when the store is unavailable.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, request), fields(entity_id = %request.entity_id, year = request.year)))]
    pub async fn issue(
        &self,
        request: &NumberingRequest,
        issued_by: &str,
    ) -> Result<SequenceAssignment, ClassifiedError> {
        let validated = request.validate(&self.config).map_err(|mut e| {
            e.report_once();
            e
        })?;
        let key = SequenceKey::new(request.entity_id.clone(), request.year);

        let cache_key = request
            .idempotency_key
            .as_ref()
            .map(|k| (key.clone(), k.clone()));
        if let Some(cache_key) = &cache_key {
            if request.fresh {
                self.cache.remove(cache_key);
            } else if let Some(hit) = self.cache.get(cache_key) {
                #[cfg(feature = "tracing")]
                tracing::debug!("Replaying cached number {}", hit.certificate_number);
                return Ok(hit);
            }
        }

        let context = ErrorContext::new("issue_certificate_number")
            .with("entityId", request.entity_id.clone())
            .with("year", request.year)
            .with("issuedBy", issued_by);
        let max_attempts = self.config.max_conflict_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = self
                .try_issue(
                    &key,
                    &validated.template,
                    validated.start_number,
                    request,
                    issued_by,
                )
                .await;

            match result {
                Ok(assignment) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(
                        sequence = assignment.sequence,
                        "Issued certificate number {}",
                        assignment.certificate_number
                    );
                    if let Some(cache_key) = cache_key {
                        self.cache.insert(cache_key, assignment.clone());
                    }
                    return Ok(assignment);
                }
                Err(IssueError::Invalid(mut err)) => {
                    err.context.merge_missing(&context);
                    err.report_once();
                    return Err(err);
                }
                Err(IssueError::Store(e)) if e.is_conflict() && attempt < max_attempts => {
                    let delay = self.config.conflict_backoff.saturating_mul(attempt);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        "Sequence write conflict (attempt {attempt}/{max_attempts}), retrying in {delay:?}: {e}"
                    );
                    P::sleep_for(delay).await;
                    attempt += 1;
                }
                Err(IssueError::Store(e)) if e.is_conflict() => {
                    let mut err = ClassifiedError::new(
                        ErrorCategory::Database,
                        format!("Certificate number conflict after {attempt} attempts: {e}"),
                    )
                    .with_code(NUMBER_CONFLICT)
                    .with_user_message(
                        "Another certificate number was issued at the same time. Please request a new number.",
                    )
                    .with_context(context.with("attempts", attempt))
                    .with_cause(e);
                    err.report_once();
                    return Err(err);
                }
                Err(IssueError::Store(e)) => {
                    let mut err = ClassifiedError::new(ErrorCategory::Database, e.to_string())
                        .with_context(context)
                        .with_cause(e);
                    err.report_once();
                    return Err(err);
                }
            }
        }
    }

    /// Returns the sequence the next [`issue`](Self::issue) for the pair would
    /// use, without committing anything.
    ///
    /// # Errors
    ///
    /// Returns a database error when the store is unavailable.
    pub async fn peek_next(&self, entity_id: &str, year: i32) -> Result<u64, ClassifiedError> {
        let key = SequenceKey::new(entity_id, year);
        let read = async {
            let mut tx = self.store.begin(&key).await?;
            Ok::<_, StoreError>(tx.last_sequence().await?)
        };
        match read.await {
            Ok(last) => Ok(last.map_or(self.config.default_start_number.max(1), |s| s + 1)),
            Err(e) => Err(ClassifiedError::new(ErrorCategory::Database, e.to_string())
                .with_context(
                    ErrorContext::new("peek_certificate_number")
                        .with("entityId", entity_id)
                        .with("year", year),
                )
                .with_cause(e)),
        }
    }

    /// Drops every cached number for the pair.
    pub fn invalidate(&self, entity_id: &str, year: i32) {
        self.cache
            .remove_where(|(key, _)| key.entity_id == entity_id && key.year == year);
    }

    async fn try_issue(
        &self,
        key: &SequenceKey,
        template: &str,
        start_number: u64,
        request: &NumberingRequest,
        issued_by: &str,
    ) -> Result<SequenceAssignment, IssueError> {
        let mut tx = self.store.begin(key).await?;
        let sequence = match tx.last_sequence().await? {
            Some(last) => last + 1,
            None => start_number,
        };

        let certificate_number = render_number(
            template,
            key.year,
            sequence,
            request.prefix.as_deref(),
            request.suffix.as_deref(),
        );
        // Dropping `tx` on this path rolls the transaction back.
        validate_number(&certificate_number, key.year, sequence).map_err(IssueError::Invalid)?;

        let issued_at = Utc::now();
        tx.commit(SequenceRecord {
            entity_id: key.entity_id.clone(),
            year: key.year,
            sequence,
            certificate_number: certificate_number.clone(),
            issued_at,
            issued_by: issued_by.to_string(),
        })
        .await?;

        Ok(SequenceAssignment {
            certificate_number,
            year: key.year,
            sequence,
            entity_id: key.entity_id.clone(),
            issued_at,
            issued_by: issued_by.to_string(),
        })
    }
}
