use crate::error::StoreError;
use crate::store::{CounterStore, UsageRecord};
use chrono::Utc;
use std::sync::Arc;
use tracing::trace;

/// Argument summaries longer than this are cut on a char boundary.
const MAX_SUMMARY_CHARS: usize = 200;

/// Append-only audit trail of attempted command executions.
///
/// Writes are best effort: `record` returns the store error so the caller
/// can log it, but a lost entry never aborts the command it describes.
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn CounterStore>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, entry: UsageEntry<'_>) -> Result<(), StoreError> {
        let record = entry.into_record();
        trace!(
            identity = %record.identity,
            command = %record.command_name,
            success = record.success,
            "Recording usage"
        );
        self.store.append_usage(&record).await
    }
}

/// Borrowed description of one attempt, turned into a [`UsageRecord`] when
/// written.
#[derive(Debug, Clone, Copy)]
pub struct UsageEntry<'a> {
    pub identity: &'a str,
    pub scope_id: Option<&'a str>,
    pub command_name: &'a str,
    pub args: &'a [String],
    pub resource_category: Option<&'a str>,
    pub error: Option<&'a str>,
}

impl<'a> UsageEntry<'a> {
    pub fn new(identity: &'a str, command_name: &'a str, args: &'a [String]) -> Self {
        Self {
            identity,
            scope_id: None,
            command_name,
            args,
            resource_category: None,
            error: None,
        }
    }

    pub fn scope(mut self, scope_id: Option<&'a str>) -> Self {
        self.scope_id = scope_id;
        self
    }

    pub fn category(mut self, category: Option<&'a str>) -> Self {
        self.resource_category = category;
        self
    }

    pub fn failed(mut self, error: &'a str) -> Self {
        self.error = Some(error);
        self
    }

    fn into_record(self) -> UsageRecord {
        UsageRecord {
            identity: self.identity.to_string(),
            scope_id: self.scope_id.map(str::to_string),
            command_name: self.command_name.to_string(),
            argument_summary: summarize_args(self.args),
            resource_category: self.resource_category.map(str::to_string),
            success: self.error.is_none(),
            error_summary: self.error.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

fn summarize_args(args: &[String]) -> Option<String> {
    if args.is_empty() {
        return None;
    }
    let joined = args.join(" ");
    match joined.char_indices().nth(MAX_SUMMARY_CHARS) {
        Some((cut, _)) => Some(format!("{}…", &joined[..cut])),
        None => Some(joined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_records_success_and_failure() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = UsageLedger::new(store.clone());
        let args = vec!["cat".to_string(), "gifs".to_string()];

        ledger
            .record(UsageEntry::new("u1", "search", &args).scope(Some("guild-1")).category(Some("gif")))
            .await
            .unwrap();
        ledger
            .record(UsageEntry::new("u1", "search", &[]).failed("Transfer failed: 500"))
            .await
            .unwrap();

        let records = store.usage_records().await;
        assert_eq!(records.len(), 2);
        assert!(records[0].success);
        assert_eq!(records[0].argument_summary.as_deref(), Some("cat gifs"));
        assert_eq!(records[0].scope_id.as_deref(), Some("guild-1"));
        assert_eq!(records[0].resource_category.as_deref(), Some("gif"));
        assert!(!records[1].success);
        assert_eq!(records[1].argument_summary, None);
        assert_eq!(records[1].error_summary.as_deref(), Some("Transfer failed: 500"));
    }

    #[test]
    fn test_summary_truncated_on_char_boundary() {
        let args = vec!["é".repeat(500)];
        let summary = summarize_args(&args).unwrap();
        assert_eq!(summary.chars().count(), MAX_SUMMARY_CHARS + 1);
        assert!(summary.ends_with('…'));
    }
}
