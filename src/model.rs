use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type RequestId = Ulid;
/// Opaque reference into the external item catalog.
pub type ItemId = Ulid;
/// Opaque reference into the external identity store.
pub type UserId = Ulid;

/// Closed date range `[start, end]`. `start == end` is a single-day borrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateSpan start must not be after end");
        Self { start, end }
    }

    /// Number of days covered, both bounds included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Inclusive overlap: sharing a boundary day counts.
    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Denied => "denied",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRequest {
    pub id: RequestId,
    pub item_id: ItemId,
    pub user_id: UserId,
    pub span: DateSpan,
    pub status: RequestStatus,
}

/// Immutable record of a completed borrow, keyed by the request it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowHistory {
    pub request_id: RequestId,
    pub item_id: ItemId,
    pub user_id: UserId,
    pub span: DateSpan,
}

impl BorrowHistory {
    pub fn from_request(request: &BorrowRequest) -> Self {
        Self {
            request_id: request.id,
            item_id: request.item_id,
            user_id: request.user_id,
            span: request.span,
        }
    }
}

/// Everything known about one item: its requests (all statuses) and archived borrows.
#[derive(Debug, Clone)]
pub struct ItemState {
    pub id: ItemId,
    /// Sorted by `span.start`.
    pub requests: Vec<BorrowRequest>,
    pub history: Vec<BorrowHistory>,
}

impl ItemState {
    pub fn new(id: ItemId) -> Self {
        Self {
            id,
            requests: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Insert request maintaining sort order by span.start.
    pub fn insert_request(&mut self, request: BorrowRequest) {
        let pos = self
            .requests
            .partition_point(|r| r.span.start <= request.span.start);
        self.requests.insert(pos, request);
    }

    pub fn request(&self, id: &RequestId) -> Option<&BorrowRequest> {
        self.requests.iter().find(|r| r.id == *id)
    }

    pub fn request_mut(&mut self, id: &RequestId) -> Option<&mut BorrowRequest> {
        self.requests.iter_mut().find(|r| r.id == *id)
    }

    /// Requests whose span overlaps the query, any status.
    /// Binary search skips requests starting after `query.end`.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &BorrowRequest> {
        let right_bound = self.requests.partition_point(|r| r.span.start <= query.end);
        self.requests[..right_bound]
            .iter()
            .filter(move |r| r.span.end >= query.start)
    }

    pub fn approved(&self) -> impl Iterator<Item = &BorrowRequest> {
        self.requests
            .iter()
            .filter(|r| r.status == RequestStatus::Approved)
    }

    pub fn history_for(&self, request_id: &RequestId) -> Option<&BorrowHistory> {
        self.history.iter().find(|h| h.request_id == *request_id)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RequestSubmitted {
        id: RequestId,
        item_id: ItemId,
        user_id: UserId,
        span: DateSpan,
    },
    RequestApproved {
        id: RequestId,
        item_id: ItemId,
    },
    RequestDenied {
        id: RequestId,
        item_id: ItemId,
    },
    HistoryArchived {
        request_id: RequestId,
        item_id: ItemId,
        user_id: UserId,
        span: DateSpan,
    },
}

impl Event {
    pub fn item_id(&self) -> ItemId {
        match self {
            Event::RequestSubmitted { item_id, .. }
            | Event::RequestApproved { item_id, .. }
            | Event::RequestDenied { item_id, .. }
            | Event::HistoryArchived { item_id, .. } => *item_id,
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Event::RequestSubmitted { id, .. }
            | Event::RequestApproved { id, .. }
            | Event::RequestDenied { id, .. } => *id,
            Event::HistoryArchived { request_id, .. } => *request_id,
        }
    }

    /// Short name used for metrics labels and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::RequestSubmitted { .. } => "submitted",
            Event::RequestApproved { .. } => "approved",
            Event::RequestDenied { .. } => "denied",
            Event::HistoryArchived { .. } => "archived",
        }
    }
}
