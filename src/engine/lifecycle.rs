use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{find_conflict, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Create a `Pending` request.
    ///
    /// The conflict check here runs under a read guard that is released before
    /// the request is written, so it only filters out obviously doomed
    /// submissions. `approve` makes the binding decision.
    pub async fn submit(
        &self,
        user_id: UserId,
        item_id: ItemId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BorrowRequest, EngineError> {
        let span = validate_span(start, end)?;
        let id = Ulid::new();
        let _gate = self.enter_submit().await?;

        if !self.state.contains_key(&item_id) && self.state.len() >= MAX_ITEMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many items"));
        }
        let item = self.get_or_create_item(item_id);

        {
            let guard = self.read_item(item.clone()).await?;
            if let Some(existing) = find_conflict(&guard, &span, None) {
                debug!(%item_id, %span, existing = %existing.id, "submission rejected by advisory check");
                return Err(EngineError::Conflict {
                    request: id,
                    existing: existing.id,
                });
            }
        }

        let guard = self.lock_item(item).await?;
        let request = self
            .commit_exclusive(guard, move |item| {
                if item.requests.len() >= MAX_REQUESTS_PER_ITEM {
                    return Err(EngineError::LimitExceeded("too many requests on item"));
                }
                let event = Event::RequestSubmitted {
                    id,
                    item_id,
                    user_id,
                    span,
                };
                let request = BorrowRequest {
                    id,
                    item_id,
                    user_id,
                    span,
                    status: RequestStatus::Pending,
                };
                Ok((event, request))
            })
            .await?;

        info!(request = %id, %item_id, %user_id, %span, "borrow request submitted");
        Ok(request)
    }

    /// Move a `Pending` request to `Approved`.
    ///
    /// Status check, conflict re-check and status write all happen inside the
    /// item's exclusive scope, so two overlapping approvals on one item can
    /// never both succeed. On conflict the request is left `Pending`.
    pub async fn approve(&self, request_id: RequestId) -> Result<BorrowRequest, EngineError> {
        let guard = self.resolve_request_write(&request_id).await?;
        let result = self
            .commit_exclusive(guard, move |item| {
                let request = pending_request(item, &request_id)?;
                if let Some(existing) = find_conflict(item, &request.span, None) {
                    return Err(EngineError::Conflict {
                        request: request_id,
                        existing: existing.id,
                    });
                }
                let event = Event::RequestApproved {
                    id: request_id,
                    item_id: item.id,
                };
                Ok((event, BorrowRequest {
                    status: RequestStatus::Approved,
                    ..request.clone()
                }))
            })
            .await;

        match result {
            Ok(request) => {
                info!(request = %request_id, item_id = %request.item_id, span = %request.span, "borrow request approved");
                Ok(request)
            }
            Err(e @ EngineError::Conflict { .. }) => {
                metrics::counter!(observability::APPROVAL_CONFLICTS_TOTAL).increment(1);
                debug!(request = %request_id, "approval rejected: {e}");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Move a `Pending` request to `Denied`. Denial never claims the item, so
    /// there is no conflict check.
    pub async fn deny(&self, request_id: RequestId) -> Result<BorrowRequest, EngineError> {
        let guard = self.resolve_request_write(&request_id).await?;
        let request = self
            .commit_exclusive(guard, move |item| {
                let request = pending_request(item, &request_id)?;
                let event = Event::RequestDenied {
                    id: request_id,
                    item_id: item.id,
                };
                Ok((event, BorrowRequest {
                    status: RequestStatus::Denied,
                    ..request.clone()
                }))
            })
            .await?;

        info!(request = %request_id, item_id = %request.item_id, "borrow request denied");
        Ok(request)
    }
}

fn pending_request<'a>(item: &'a ItemState, id: &RequestId) -> Result<&'a BorrowRequest, EngineError> {
    let request = item.request(id).ok_or(EngineError::NotFound(*id))?;
    if request.status.is_terminal() {
        return Err(EngineError::InvalidState {
            id: *id,
            status: request.status,
        });
    }
    Ok(request)
}
