//! Follows a subscription's view and logs every change until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use lookout_realtime::{BroadcastClient, NoticeSubscriber, PresenceSet, PresenceSubscriber};
use tracing::{info, warn};

/// `1 Ada, 3 Linus`, or `nobody`.
pub fn format_roster(set: &PresenceSet) -> String {
    if set.is_empty() {
        return "nobody".into();
    }
    set.iter()
        .map(|m| {
            if m.name.is_empty() {
                m.id.to_string()
            } else {
                format!("{} {}", m.id, m.name)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub async fn who(client: Arc<dyn BroadcastClient>, channel: &str) {
    let sub = PresenceSubscriber::new(client).subscribe(channel).await;
    let mut view = sub.watch();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(channel = %channel, "Watching presence");
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let set = view.borrow_and_update().clone();
                info!(
                    channel = %channel,
                    count = set.len(),
                    state = %sub.state(),
                    "Online: {}",
                    format_roster(&set)
                );
            }
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
        }
    }

    sub.unsubscribe().await;
    info!(channel = %channel, "Unsubscribed");
}

pub async fn notices(
    client: Arc<dyn BroadcastClient>,
    channel: &str,
    event: &str,
    display: Duration,
) {
    let sub = NoticeSubscriber::with_ttl(client, display)
        .subscribe(channel, event)
        .await;
    let mut view = sub.watch();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(channel = %channel, event = %event, "Watching notices");
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                match current {
                    Some(notice) => info!(channel = %channel, "Notice: {}", notice.text),
                    None => info!(channel = %channel, "Notice cleared"),
                }
            }
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
        }
    }

    sub.unsubscribe().await;
    info!(channel = %channel, "Unsubscribed");
}
