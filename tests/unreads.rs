//! Integration tests for unread aggregation against an in-memory workspace.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use slackwire::slack::RetryPolicy;
use slackwire::unreads::{
    Category, ChannelFilter, UnreadAggregator, UnreadError, UnreadQuery, UnreadSettings,
};
use support::*;

const DM_UNKNOWN: &str = "D0000000099";

fn counts() -> Vec<slackwire::slack::UnreadCount> {
    vec![
        count(GENERAL, 5, 0, "1700000100.000000"),
        count(ACME, 2, 1, "1700000150.000000"),
        count(SECRET, 5, 0, "1700000200.000000"),
        count(DM_ALICE, 1, 0, "1700000300.000000"),
        count(GROUP, 3, 0, "1700000120.000000"),
        count(DM_UNKNOWN, 1, 0, "1700000050.000000"),
        count("C0000000099", 0, 0, "1700000000.000000"),
    ]
}

fn unread_settings() -> UnreadSettings {
    UnreadSettings {
        max_concurrency: 4,
        history_timeout: Duration::from_secs(5),
        default_max_channels: 50,
        default_max_messages: 10,
        retry: RetryPolicy::none(),
    }
}

fn aggregator(api: Arc<MockSlack>, settings: UnreadSettings) -> (UnreadAggregator, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let dir = service(api.clone(), tmp.path());
    (UnreadAggregator::new(api, dir, settings), tmp)
}

fn ids(report: &slackwire::unreads::UnreadReport) -> Vec<&str> {
    report
        .conversations
        .iter()
        .map(|c| c.channel_id.as_str())
        .collect()
}

#[tokio::test]
async fn conversations_are_ranked_by_category_then_activity() {
    let api = Arc::new(MockSlack::standard().with_counts(counts()));
    let (agg, _tmp) = aggregator(api.clone(), unread_settings());

    let report = agg.aggregate(&UnreadQuery::default()).await.unwrap();

    assert_eq!(
        ids(&report),
        [DM_ALICE, DM_UNKNOWN, GROUP, ACME, SECRET, GENERAL]
    );
    assert_eq!(report.qualifying, 6);
    assert_eq!(report.total_unread, 17);
    assert!(!report.truncated);
    assert_eq!(report.partial_failures, 0);
    assert!(report.directory_age_secs.is_some());

    let first = &report.conversations[0];
    assert_eq!(first.name, "@alice");
    assert_eq!(first.category, Category::Dm);
    assert_eq!(report.conversations[1].name, DM_UNKNOWN);
    assert_eq!(report.conversations[3].category, Category::Partner);
    assert!(report.conversations[3].has_mention);
    assert!(report.conversations.iter().all(|c| c.messages.is_none()));
    assert_eq!(api.history_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn truncation_keeps_totals_of_every_qualifying_conversation() {
    let api = Arc::new(MockSlack::standard().with_counts(counts()));
    let (agg, _tmp) = aggregator(api, unread_settings());

    let report = agg
        .aggregate(&UnreadQuery {
            max_channels: Some(2),
            ..UnreadQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(ids(&report), [DM_ALICE, DM_UNKNOWN]);
    assert!(report.truncated);
    assert_eq!(report.qualifying, 6);
    assert_eq!(report.total_unread, 17);
}

#[tokio::test]
async fn filters_by_category_and_mentions() {
    let api = Arc::new(MockSlack::standard().with_counts(counts()));
    let (agg, _tmp) = aggregator(api, unread_settings());

    let internal = agg
        .aggregate(&UnreadQuery {
            channel_types: ChannelFilter::Internal,
            ..UnreadQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&internal), [SECRET, GENERAL]);
    assert_eq!(internal.total_unread, 10);

    let mentions = agg
        .aggregate(&UnreadQuery {
            mentions_only: true,
            ..UnreadQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&mentions), [ACME]);
}

#[tokio::test]
async fn messages_are_fetched_since_last_read_and_annotated() {
    let api = Arc::new(
        MockSlack::standard()
            .with_counts(vec![count(DM_ALICE, 3, 0, "1700000300.000000")])
            .with_history(
                DM_ALICE,
                vec![
                    message("1700000300.000000", ALICE, "third"),
                    message("1700000200.000000", ALICE, "second"),
                    message("1700000100.000000", BOB, "first"),
                ],
            ),
    );
    let (agg, _tmp) = aggregator(api.clone(), unread_settings());

    let report = agg
        .aggregate(&UnreadQuery {
            include_messages: true,
            max_messages_per_channel: Some(2),
            ..UnreadQuery::default()
        })
        .await
        .unwrap();

    let messages = report.conversations[0].messages.as_ref().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].user_handle.as_deref(), Some("alice"));

    let requests = api.history_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].oldest.as_deref(), Some("1700000000.000000"));
    assert_eq!(requests[0].limit, 2);
}

#[tokio::test]
async fn zero_message_budget_skips_history() {
    let api = Arc::new(MockSlack::standard().with_counts(counts()));
    let (agg, _tmp) = aggregator(api.clone(), unread_settings());

    let report = agg
        .aggregate(&UnreadQuery {
            include_messages: true,
            max_messages_per_channel: Some(0),
            ..UnreadQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(report.qualifying, 6);
    assert!(report.conversations.iter().all(|c| c.messages.is_none()));
    assert_eq!(report.partial_failures, 0);
    assert_eq!(api.history_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn history_failures_are_partial() {
    let api = Arc::new(
        MockSlack::standard()
            .with_counts(counts())
            .failing_history(GENERAL),
    );
    let (agg, _tmp) = aggregator(api, unread_settings());

    let report = agg
        .aggregate(&UnreadQuery {
            include_messages: true,
            ..UnreadQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(report.partial_failures, 1);
    for conv in &report.conversations {
        if conv.channel_id == GENERAL {
            assert!(conv.messages.is_none());
            assert!(conv.history_error.as_ref().unwrap().contains("channel_not_found"));
        } else {
            assert!(conv.messages.is_some(), "{} has messages", conv.channel_id);
            assert!(conv.history_error.is_none());
        }
    }
}

#[tokio::test]
async fn slow_history_times_out_alone() {
    let api = Arc::new(
        MockSlack::standard()
            .with_counts(counts())
            .hanging_history(SECRET),
    );
    let (agg, _tmp) = aggregator(
        api,
        UnreadSettings {
            history_timeout: Duration::from_millis(100),
            ..unread_settings()
        },
    );

    let report = agg
        .aggregate(&UnreadQuery {
            include_messages: true,
            ..UnreadQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(report.partial_failures, 1);
    let secret = report
        .conversations
        .iter()
        .find(|c| c.channel_id == SECRET)
        .unwrap();
    assert!(secret.history_error.as_ref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn history_fetches_respect_the_concurrency_limit() {
    let api = Arc::new(
        MockSlack::standard()
            .with_counts(counts())
            .with_delay(Duration::from_millis(20)),
    );
    let (agg, _tmp) = aggregator(
        api.clone(),
        UnreadSettings {
            max_concurrency: 2,
            ..unread_settings()
        },
    );

    agg.aggregate(&UnreadQuery {
        include_messages: true,
        ..UnreadQuery::default()
    })
    .await
    .unwrap();

    assert_eq!(api.history_calls.load(Ordering::SeqCst), 6);
    assert!(api.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn counts_failure_is_fatal() {
    let api = Arc::new(MockSlack::standard().with_counts(counts()));
    api.fail_counts.store(true, Ordering::SeqCst);
    let (agg, _tmp) = aggregator(api, unread_settings());

    let err = agg.aggregate(&UnreadQuery::default()).await.unwrap_err();
    assert!(matches!(err, UnreadError::Counts(_)));
}

#[tokio::test]
async fn missing_directory_falls_back_to_ids() {
    let api = Arc::new(MockSlack::standard().with_counts(counts()));
    api.fail_listing.store(true, Ordering::SeqCst);
    let (agg, _tmp) = aggregator(api, unread_settings());

    let report = agg.aggregate(&UnreadQuery::default()).await.unwrap();

    assert!(report.directory_age_secs.is_none());
    assert!(report.conversations.iter().all(|c| c.name == c.channel_id));
    // Without the directory only the D prefix is known.
    assert_eq!(report.conversations[0].category, Category::Dm);
    assert_eq!(report.conversations[1].category, Category::Dm);
    assert_eq!(report.conversations[2].category, Category::Internal);
}
