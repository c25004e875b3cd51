//! Fan-in router
//!
//! One forwarder task per subclient pushes `(index, message)` pairs into a
//! shared channel, the strongly-typed replacement for a reflective select
//! over N streams, preserving per-path FIFO order and fair merging. The
//! router task drains that channel: session segments go to the session
//! manager, application messages are deduplicated, src-stripped, given a
//! reply handle, and published. The shutdown signal is a first-class select
//! source everywhere, so teardown wakes the router even when no traffic
//! arrives.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use braid_core::{add_tag, strip_tag, Message, ReplyHandle, ReplySink};

use crate::multiclient::{ClientInner, FANIN_QUEUE_LEN};

pub(crate) fn spawn(
    inner: Arc<ClientInner>,
    messages_tx: mpsc::Sender<Message>,
    inbounds: Vec<(i32, mpsc::Receiver<Message>)>,
) {
    let (tagged_tx, tagged_rx) = mpsc::channel::<(i32, Message)>(FANIN_QUEUE_LEN);
    for (index, mut inbound) in inbounds {
        let tagged_tx = tagged_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                if tagged_tx.send((index, message)).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tagged_tx);

    tokio::spawn(run(inner, messages_tx, tagged_rx));
}

async fn run(
    inner: Arc<ClientInner>,
    messages_tx: mpsc::Sender<Message>,
    mut tagged_rx: mpsc::Receiver<(i32, Message)>,
) {
    let mut shutdown = inner.shutdown.subscribe();
    let sink: Arc<dyn ReplySink> = inner.clone();

    loop {
        let (index, mut message) = tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => break,
            maybe = tagged_rx.recv() => match maybe {
                Some(tagged) => tagged,
                None => break,
            },
        };

        if message.is_session {
            let local_tag = add_tag("", index);
            match inner
                .handle_segment(&local_tag, &message.src, message.pid, &message.data)
                .await
            {
                Ok(()) => {}
                // The peer tore the session down mid-flight; routine.
                Err(e) if e.is_closed() => {}
                Err(e) => {
                    warn!(session_id = %message.pid, error = %e, "failed to handle session segment")
                }
            }
            continue;
        }

        // The cache is shared with request retirement, which records the
        // pid of a finished request so late broadcast reply copies drop
        // here instead of surfacing.
        if inner.already_seen(message.pid) {
            debug!(message_id = %message.pid, index, "duplicate delivery, dropping");
            continue;
        }
        inner.mark_seen(message.pid);

        let src = strip_tag(&message.src).0.to_string();
        message.src = src;
        message.attach_reply(ReplyHandle::new(
            &sink,
            message.src.clone(),
            message.pid,
            message.encrypted,
        ));

        tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => break,
            sent = messages_tx.send(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}
