//! Listing Engine: search, age-based archival and pagination over an
//! already-fetched collection.
//!
//! `compute_view` is pure: it never fetches, sorts or owns a subscription.
//! `ViewState` is the small state container that owns page/size/mode and
//! enforces the reset-to-first-page rules. `live::LiveCollection` keeps the
//! latest snapshot that feeds it.

pub mod live;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::submission::{Submission, SubmissionLogEntry};
use crate::models::task::Task;
use crate::store::Document;

pub const DEFAULT_ITEMS_PER_PAGE: usize = 10;
pub const DEFAULT_ARCHIVE_AFTER_DAYS: i64 = 30;

/// Timestamp fields consulted, in order, for the archival cutoff.
pub const TIMESTAMP_FIELDS: [&str; 3] = ["submittedAt", "createdAt", "timestamp"];

// ────────────────────────────────────────────────────────────────────────────
// Record access
// ────────────────────────────────────────────────────────────────────────────

/// Anything the engine can list.
pub trait Listable {
    /// First of `submittedAt`, `createdAt`, `timestamp` that resolves.
    fn effective_timestamp(&self) -> Option<DateTime<Utc>>;

    /// String form of a named field, for search. `None` never matches.
    fn field_text(&self, field: &str) -> Option<String>;
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// Accepts RFC 3339 strings and epoch-millisecond numbers.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(value_text)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        other => Some(other.to_string()),
    }
}

impl Listable for Document {
    fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        TIMESTAMP_FIELDS
            .iter()
            .find_map(|f| self.fields.get(*f).and_then(parse_timestamp))
    }

    fn field_text(&self, field: &str) -> Option<String> {
        if field == "id" {
            return Some(self.id.clone());
        }
        self.fields.get(field).and_then(value_text)
    }
}

impl Listable for Submission {
    fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.submitted_at)
    }

    fn field_text(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.clone()),
            "internId" => Some(self.intern_id.clone()),
            "internName" => Some(self.intern_name.clone()),
            "title" => Some(self.title.clone()),
            "domain" => Some(self.domain.clone()),
            "description" => self.description.clone(),
            "status" => Some(self.status.to_string()),
            "points" => Some(self.points.to_string()),
            "feedback" => self.feedback.clone(),
            "taskName" => self.task_name.clone(),
            "links" => Some(self.links.join(" ")),
            _ => None,
        }
    }
}

impl Listable for Task {
    fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }

    fn field_text(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.clone()),
            "taskName" => Some(self.task_name.clone()),
            "domain" => Some(self.domain.clone()),
            "description" => Some(self.description.clone()),
            "instructions" => self.instructions.clone(),
            "assignedBy" => Some(self.assigned_by.clone()),
            "maxPoints" => Some(self.max_points.to_string()),
            _ => None,
        }
    }
}

impl Listable for SubmissionLogEntry {
    fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.timestamp)
    }

    fn field_text(&self, field: &str) -> Option<String> {
        match field {
            "actorName" => Some(self.actor_name.clone()),
            "action" => Some(self.action.clone()),
            _ => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// View computation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingQuery {
    pub search_term: String,
    pub search_fields: Vec<String>,
    pub items_per_page: usize,
    pub archive_after_days: i64,
    pub current_page: usize,
    pub show_archived: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingView<'a, T> {
    pub page_items: Vec<&'a T>,
    pub total_pages: usize,
    pub total_items: usize,
    /// Archived items matching the search, whether or not they are displayed.
    pub archived_count: usize,
}

pub fn matches_search<T: Listable>(item: &T, search_term: &str, fields: &[String]) -> bool {
    if search_term.is_empty() {
        return true;
    }
    let needle = search_term.to_lowercase();
    fields.iter().any(|field| {
        item.field_text(field)
            .is_some_and(|text| text.to_lowercase().contains(&needle))
    })
}

/// `now` minus `days`. A window too large to represent archives nothing.
fn archive_cutoff(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Computes the page to render, archival measured against the current time.
pub fn compute_view<'a, T: Listable>(items: &'a [T], query: &ListingQuery) -> ListingView<'a, T> {
    compute_view_at(items, query, Utc::now())
}

pub fn compute_view_at<'a, T: Listable>(
    items: &'a [T],
    query: &ListingQuery,
    now: DateTime<Utc>,
) -> ListingView<'a, T> {
    let cutoff = archive_cutoff(now, query.archive_after_days);

    let mut active = Vec::new();
    let mut archived = Vec::new();
    for item in items {
        if !matches_search(item, &query.search_term, &query.search_fields) {
            continue;
        }
        if item.effective_timestamp().unwrap_or_else(epoch) < cutoff {
            archived.push(item);
        } else {
            active.push(item);
        }
    }

    let archived_count = archived.len();
    let display = if query.show_archived { archived } else { active };
    let total_items = display.len();
    let total_pages = if query.items_per_page == 0 {
        0
    } else {
        total_items.div_ceil(query.items_per_page)
    };

    let page_items = match query.current_page.checked_sub(1) {
        Some(page_index) if query.items_per_page > 0 => display
            .into_iter()
            .skip(page_index.saturating_mul(query.items_per_page))
            .take(query.items_per_page)
            .collect(),
        _ => Vec::new(),
    };

    ListingView {
        page_items,
        total_pages,
        total_items,
        archived_count,
    }
}

/// Orders submissions by `submittedAt`, newest first.
pub fn sort_newest_first(submissions: &mut [Submission]) {
    submissions.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
}

// ────────────────────────────────────────────────────────────────────────────
// View state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    current_page: usize,
    items_per_page: usize,
    is_compact_view: bool,
    show_archived: bool,
    search_term: String,
}

impl Default for ViewState {
    fn default() -> Self {
        Self::new(DEFAULT_ITEMS_PER_PAGE)
    }
}

impl ViewState {
    pub fn new(items_per_page: usize) -> Self {
        Self {
            current_page: 1,
            items_per_page: items_per_page.max(1),
            is_compact_view: false,
            show_archived: false,
            search_term: String::new(),
        }
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn items_per_page(&self) -> usize {
        self.items_per_page
    }

    pub fn is_compact_view(&self) -> bool {
        self.is_compact_view
    }

    pub fn show_archived(&self) -> bool {
        self.show_archived
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.search_term = term.into();
        self.current_page = 1;
    }

    pub fn set_show_archived(&mut self, show: bool) {
        self.show_archived = show;
        self.current_page = 1;
    }

    pub fn toggle_archived(&mut self) {
        self.set_show_archived(!self.show_archived);
    }

    pub fn set_page(&mut self, page: usize) {
        self.current_page = page.max(1);
    }

    pub fn set_items_per_page(&mut self, items_per_page: usize) {
        self.items_per_page = items_per_page.max(1);
        self.current_page = 1;
    }

    pub fn toggle_compact_view(&mut self) {
        self.is_compact_view = !self.is_compact_view;
    }

    /// Pulls the current page back inside `1..=total_pages` after the
    /// collection shrinks.
    pub fn clamp_page(&mut self, total_pages: usize) {
        self.current_page = self.current_page.clamp(1, total_pages.max(1));
    }

    pub fn query(&self, search_fields: &[&str], archive_after_days: i64) -> ListingQuery {
        ListingQuery {
            search_term: self.search_term.clone(),
            search_fields: search_fields.iter().map(|f| f.to_string()).collect(),
            items_per_page: self.items_per_page,
            archive_after_days,
            current_page: self.current_page,
            show_archived: self.show_archived,
        }
    }
}
