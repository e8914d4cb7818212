//! ONCE subscriptions.
//!
//! A subscription runs as three tasks: a producer that reads the tree and queues one
//! notification followed by a sync marker, a consumer that forwards queued items to the caller,
//! and a watchdog that gives up if the consumer hasn't forwarded anything in a while.  Each task
//! reports into one error channel with room for all three, and the first report decides how the
//! subscription ends; a drained queue is reported as success.

use super::error::{self, Result};
use super::store::{timestamp, Store};
use apitypes::{
    Notification, Path, SubscribeRequest, SubscribeResponse, SubscriptionList,
    SubscriptionListMode,
};
use datastore::SchemaOracle;
use log::{debug, info, trace};
use snafu::ensure;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};

/// How long the consumer may go without forwarding anything.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub timeout: Duration,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// The transport side of a subscription.  Dropping the receiving end of `responses` cancels the
/// subscription.
#[derive(Debug)]
pub struct SubscribeStream {
    pub requests: mpsc::UnboundedReceiver<SubscribeRequest>,
    pub responses: mpsc::UnboundedSender<SubscribeResponse>,
}

impl SubscribeStream {
    pub fn new(
        requests: mpsc::UnboundedReceiver<SubscribeRequest>,
        responses: mpsc::UnboundedSender<SubscribeResponse>,
    ) -> Self {
        Self {
            requests,
            responses,
        }
    }
}

/// What the producer hands to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Notification(Notification),
    Sync,
}

/// Serves one subscription.  The first request has to be a subscription list; if the requests
/// end before there is one, there's nothing to do.
pub async fn subscribe<S>(
    store: Arc<Store<S>>,
    mut stream: SubscribeStream,
    options: SubscribeOptions,
) -> Result<()>
where
    S: SchemaOracle + 'static,
{
    let list = match stream.requests.recv().await {
        Some(SubscribeRequest::Subscribe(list)) => list,
        Some(_) => return error::NotSubscriptionListSnafu.fail(),
        None => {
            debug!("Request stream ended before any subscription");
            return Ok(());
        }
    };

    ensure!(!list.allow_aggregation, error::AggregationSnafu);
    ensure!(list.use_models.is_empty(), error::SubscribeUseModelsSnafu);
    store.check_encoding_and_models(list.encoding, &list.use_models)?;
    ensure!(
        list.mode == SubscriptionListMode::Once,
        error::SubscribeModeSnafu { mode: list.mode }
    );

    info!(
        "Starting ONCE subscription to {} path(s)",
        list.subscription.len()
    );
    once(store, list, stream.responses, options).await
}

async fn once<S>(
    store: Arc<Store<S>>,
    list: SubscriptionList,
    responses: mpsc::UnboundedSender<SubscribeResponse>,
    options: SubscribeOptions,
) -> Result<()>
where
    S: SchemaOracle + 'static,
{
    // One slot per task, so reporting never waits.
    let (err_tx, mut err_rx) = mpsc::channel::<Result<()>>(3);
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let (deadline_tx, deadline_rx) = watch::channel(Instant::now() + options.timeout);

    // The producer takes the std read lock, so it gets a blocking thread.
    {
        let err_tx = err_tx.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = produce(&store, &list, &queue_tx) {
                debug!("Subscription producer failed: {}", e);
                let _ = err_tx.try_send(Err(e));
            }
            // queue_tx drops only now, so an error is reported before the consumer sees the
            // queue close.
        });
    }

    let consumer = {
        let err_tx = err_tx.clone();
        tokio::spawn(async move {
            let result = consume(queue_rx, &responses, &deadline_tx, options.timeout).await;
            let _ = err_tx.try_send(result);
        })
    };

    let timer = tokio::spawn(async move {
        if watchdog(deadline_rx).await {
            debug!("Subscription watchdog fired");
            let _ = err_tx.try_send(
                error::SubscribeTimeoutSnafu {
                    timeout: options.timeout,
                }
                .fail(),
            );
        }
    });

    let result = err_rx.recv().await.unwrap_or(Ok(()));
    consumer.abort();
    timer.abort();
    result
}

/// Reads every subscribed path under one read lock and queues a single notification holding all
/// of their leaves, then the sync marker.
fn produce<S: SchemaOracle>(
    store: &Store<S>,
    list: &SubscriptionList,
    queue: &mpsc::UnboundedSender<QueueItem>,
) -> Result<()> {
    if !list.updates_only {
        let tree = store.read_tree()?;
        let mut update = Vec::new();
        for subscription in &list.subscription {
            let full = Path::full_path(list.prefix.as_ref(), &subscription.path);
            trace!("Collecting leaves under {}", full);
            update.extend(store.leaf_updates(&tree, &full)?);
        }
        drop(tree);

        let notification = Notification {
            timestamp: timestamp(),
            prefix: None,
            update,
            delete: Vec::new(),
        };
        if queue.send(QueueItem::Notification(notification)).is_err() {
            trace!("Subscription consumer is gone");
            return Ok(());
        }
    }

    if queue.send(QueueItem::Sync).is_err() {
        trace!("Subscription consumer is gone");
    }
    Ok(())
}

/// Forwards queued items until the queue is drained, pushing the deadline back after each send.
async fn consume(
    mut queue: mpsc::UnboundedReceiver<QueueItem>,
    responses: &mpsc::UnboundedSender<SubscribeResponse>,
    deadline: &watch::Sender<Instant>,
    timeout: Duration,
) -> Result<()> {
    loop {
        let item = tokio::select! {
            item = queue.recv() => item,
            _ = responses.closed() => return error::SubscribeCancelledSnafu.fail(),
        };

        let response = match item {
            Some(QueueItem::Notification(notification)) => SubscribeResponse::Update(notification),
            Some(QueueItem::Sync) => SubscribeResponse::SyncResponse(true),
            None => {
                debug!("Subscription queue drained");
                return Ok(());
            }
        };

        ensure!(
            responses.send(response).is_ok(),
            error::SubscribeCancelledSnafu
        );
        deadline.send_replace(Instant::now() + timeout);
    }
}

/// Waits for the deadline, following it as it's pushed back.  Returns true if it passed, and
/// false if the consumer went away first.
async fn watchdog(mut deadline: watch::Receiver<Instant>) -> bool {
    loop {
        let at = *deadline.borrow_and_update();
        tokio::select! {
            _ = time::sleep_until(at) => return true,
            changed = deadline.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}
