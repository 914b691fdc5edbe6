use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::digest::window::FetchWindow;
use crate::error::QqsumError;
use crate::onebot::gateway::HistorySource;
use crate::onebot::types::{ChatMessage, MessageId};

#[derive(Debug, Clone, Copy)]
pub struct FetchBudget {
    pub max_pages: u32,
    pub max_messages: usize,
    pub page_size: u32,
    pub delay: Duration,
}

/// Why the pagination loop stopped. Every variant except the error ones is
/// a normal end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    EmptyPage,
    MessageBudgetExhausted,
    MalformedPage,
    WindowExhausted,
    CursorAtOrigin,
    NoCursorProgress,
    PageBudgetExhausted,
    TransportError,
}

impl HaltReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyPage => "empty_page",
            Self::MessageBudgetExhausted => "message_budget_exhausted",
            Self::MalformedPage => "malformed_page",
            Self::WindowExhausted => "window_exhausted",
            Self::CursorAtOrigin => "cursor_at_origin",
            Self::NoCursorProgress => "no_cursor_progress",
            Self::PageBudgetExhausted => "page_budget_exhausted",
            Self::TransportError => "transport_error",
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, Self::MalformedPage | Self::TransportError)
    }
}

#[derive(Debug)]
pub struct FetchOutcome {
    /// Admitted messages sorted by `(time, message_seq)`.
    pub messages: Vec<ChatMessage>,
    pub halt: HaltReason,
    pub pages: u32,
    pub error: Option<QqsumError>,
}

pub fn fetch_history<S: HistorySource + ?Sized>(
    source: &S,
    group_id: i64,
    window: FetchWindow,
    budget: FetchBudget,
) -> FetchOutcome {
    let mut seen: HashSet<MessageId> = HashSet::new();
    let mut admitted: Vec<ChatMessage> = Vec::new();
    let mut cursor: Option<i64> = None;
    let mut pages = 0u32;
    let mut failure: Option<QqsumError> = None;

    let halt = loop {
        let page = match source.history_page(group_id, cursor, budget.page_size) {
            Ok(page) => page,
            Err(err) => {
                warn!(group_id, ?cursor, error = %err, "history request failed; keeping admitted messages");
                failure = Some(err);
                break HaltReason::TransportError;
            }
        };
        pages += 1;

        let Some(oldest) = page.first() else {
            debug!(page = pages, "gateway returned no more messages");
            break HaltReason::EmptyPage;
        };
        let oldest_time = oldest.time;
        let oldest_seq = oldest.message_seq;
        let received = page.len();

        let mut added = 0usize;
        for msg in page {
            if admitted.len() >= budget.max_messages {
                break;
            }
            if !window.contains(msg.time) {
                continue;
            }
            if !seen.insert(msg.message_id.clone()) {
                continue;
            }
            admitted.push(msg);
            added += 1;
        }
        debug!(
            page = pages,
            received,
            added,
            admitted = admitted.len(),
            ?cursor,
            "history page processed"
        );

        if admitted.len() >= budget.max_messages {
            break HaltReason::MessageBudgetExhausted;
        }
        let Some(next) = oldest_seq else {
            failure = Some(QqsumError::Data(
                "oldest message of page has no message_seq".to_string(),
            ));
            break HaltReason::MalformedPage;
        };
        if oldest_time < window.start && added == 0 {
            break HaltReason::WindowExhausted;
        }
        if next == 0 {
            break HaltReason::CursorAtOrigin;
        }
        if cursor == Some(next) {
            break HaltReason::NoCursorProgress;
        }
        cursor = Some(next);
        if pages >= budget.max_pages {
            break HaltReason::PageBudgetExhausted;
        }

        if !budget.delay.is_zero() {
            thread::sleep(budget.delay);
        }
    };

    admitted.sort_by_key(|m| (m.time, m.message_seq.unwrap_or_default()));
    info!(
        group_id,
        pages,
        admitted = admitted.len(),
        halt = halt.as_str(),
        "history fetch finished"
    );

    FetchOutcome {
        messages: admitted,
        halt,
        pages,
        error: failure,
    }
}
