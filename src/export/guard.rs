use std::future::Future;

use log::info;

use crate::error::SyncError;
use crate::store::StoreError;

/// Await `op`, turning a unique constraint violation into [`SyncError::Retryable`].
///
/// Two jobs creating the same binding at once both pass the existence check; the
/// loser hits the constraint and runs again once the winner has committed. Any other
/// error passes through unchanged.
pub async fn retry_unique_violation<T, F>(op: F) -> Result<T, SyncError>
where
	F: Future<Output = Result<T, StoreError>>,
{
	match op.await {
		Ok(value) => Ok(value),
		Err(StoreError::UniqueViolation(detail)) => {
			info!("unique violation while creating a record, job will be retried: {}", detail);
			Err(SyncError::Retryable(format!(
				"A database error caused the job to fail:\n{}\n\n\
				 Probably two concurrent jobs tried to create the same record. \
				 The job will be retried later.",
				detail
			)))
		}
		Err(e) => Err(e.into()),
	}
}
