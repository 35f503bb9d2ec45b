use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, SharedItemState};

impl Engine {
    pub async fn get_request(&self, id: RequestId) -> Result<BorrowRequest, EngineError> {
        let item_id = self
            .get_item_for_request(&id)
            .ok_or(EngineError::NotFound(id))?;
        let item = self.get_item(&item_id).ok_or(EngineError::NotFound(id))?;
        let guard = self.read_item(item).await?;
        guard.request(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// All requests for an item in start-date order. An unknown item has none.
    pub async fn list_for_item(&self, item_id: ItemId) -> Result<Vec<BorrowRequest>, EngineError> {
        let Some(item) = self.get_item(&item_id) else {
            return Ok(vec![]);
        };
        let guard = self.read_item(item).await?;
        Ok(guard.requests.clone())
    }

    pub async fn list_for_items(&self, item_ids: &[ItemId]) -> Result<Vec<BorrowRequest>, EngineError> {
        if item_ids.len() > MAX_IN_CLAUSE_IDS {
            return Err(EngineError::LimitExceeded("too many item IDs"));
        }
        let mut out = Vec::new();
        for id in item_ids {
            out.extend(self.list_for_item(*id).await?);
        }
        Ok(out)
    }

    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<BorrowRequest>, EngineError> {
        self.collect_requests(|r| r.user_id == user_id).await
    }

    pub async fn list_requests(&self) -> Result<Vec<BorrowRequest>, EngineError> {
        self.collect_requests(|_| true).await
    }

    pub async fn history_for_user(&self, user_id: UserId) -> Result<Vec<BorrowHistory>, EngineError> {
        self.collect_history(|h| h.user_id == user_id).await
    }

    /// Every history record, oldest borrow first. Backs the export.
    pub async fn list_history(&self) -> Result<Vec<BorrowHistory>, EngineError> {
        self.collect_history(|_| true).await
    }

    pub(super) fn item_handles(&self) -> Vec<SharedItemState> {
        // Clone the Arcs out first so no DashMap shard lock is held across an await.
        self.state.iter().map(|e| e.value().clone()).collect()
    }

    async fn collect_requests(
        &self,
        keep: impl Fn(&BorrowRequest) -> bool,
    ) -> Result<Vec<BorrowRequest>, EngineError> {
        let mut out = Vec::new();
        for item in self.item_handles() {
            let guard = self.read_item(item).await?;
            out.extend(guard.requests.iter().filter(|r| keep(r)).cloned());
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        Ok(out)
    }

    async fn collect_history(
        &self,
        keep: impl Fn(&BorrowHistory) -> bool,
    ) -> Result<Vec<BorrowHistory>, EngineError> {
        let mut out = Vec::new();
        for item in self.item_handles() {
            let guard = self.read_item(item).await?;
            out.extend(guard.history.iter().filter(|h| keep(h)).cloned());
        }
        out.sort_by_key(|h| (h.span.start, h.request_id));
        Ok(out)
    }
}
