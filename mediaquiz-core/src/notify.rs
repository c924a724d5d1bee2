//! Pipeline event notifications.
//!
//! The delivery channel is pluggable; [`LogNotifier`] writes events to the log.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use crate::tally::Decision;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    /// A submitter saved uploads into the staging collection.
    Added {
        submitter: String,
        count: usize,
        items: Vec<String>,
    },
    /// A verifier voted on a staged image.
    Verified {
        submitter: String,
        decision: Decision,
    },
    /// A promotion run pushed both collections.
    Promoted {
        added: usize,
        rejected: usize,
        items: Vec<String>,
        urls: Vec<String>,
    },
    Error { message: String },
}

impl Notification {
    /// One-line human readable summary.
    pub fn summary(&self) -> String {
        match self {
            Notification::Added {
                submitter,
                count,
                items,
            } => format!(
                "{submitter} added {count} new image{} for {}",
                plural(*count),
                join_items(items)
            ),
            Notification::Verified {
                submitter,
                decision,
            } => format!("{submitter} marked an image as {decision}"),
            Notification::Promoted {
                added,
                rejected,
                items,
                ..
            } => {
                let mut text = format!("{added} new image{} added", plural(*added));
                if *added > 0 {
                    text.push_str(&format!(" for {}", join_items(items)));
                }
                text.push_str(&format!(", {rejected} rejected"));
                text
            }
            Notification::Error { message } => message.clone(),
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn join_items(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{a} and {b}"),
        [rest @ .., last] => format!("{}, and {last}", rest.join(", ")),
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        match &notification {
            Notification::Error { message } => error!(message = %message, "Pipeline error"),
            other => info!(event = %other.summary(), "Pipeline event"),
        }
    }
}
