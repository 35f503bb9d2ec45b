use chrono::NaiveDate;
use tracing::info;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Record an approved borrow in history.
    ///
    /// History is keyed by the source request, so archiving the same request
    /// again returns the existing record without writing anything. The request
    /// itself is left as it is for the audit trail.
    pub async fn archive(&self, request_id: RequestId) -> Result<BorrowHistory, EngineError> {
        let guard = self.resolve_request_write(&request_id).await?;

        if let Some(existing) = guard.history_for(&request_id) {
            return Ok(existing.clone());
        }

        let history = self
            .commit_exclusive(guard, move |item| {
                let request = item
                    .request(&request_id)
                    .ok_or(EngineError::NotFound(request_id))?;
                if request.status != RequestStatus::Approved {
                    return Err(EngineError::InvalidState {
                        id: request_id,
                        status: request.status,
                    });
                }
                let history = BorrowHistory::from_request(request);
                let event = Event::HistoryArchived {
                    request_id,
                    item_id: history.item_id,
                    user_id: history.user_id,
                    span: history.span,
                };
                Ok((event, history))
            })
            .await?;

        info!(request = %request_id, item_id = %history.item_id, "borrow archived");
        Ok(history)
    }

    /// Approved requests whose span ended before `today` and that have no
    /// history record yet. The caller supplies the date; the engine never
    /// reads the clock.
    pub async fn due_for_archive(&self, today: NaiveDate) -> Result<Vec<RequestId>, EngineError> {
        let mut due = Vec::new();
        for item in self.item_handles() {
            let guard = self.read_item(item).await?;
            due.extend(
                guard
                    .approved()
                    .filter(|r| r.span.end < today && guard.history_for(&r.id).is_none())
                    .map(|r| r.id),
            );
        }
        Ok(due)
    }
}
