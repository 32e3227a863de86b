//! Receive loop, the only reader of a connection.
//!
//! LIFECYCLE
//! =========
//! 1. Signal `ready` so `connect` can report `Connected`.
//! 2. Read frame → decode → route, until end-of-stream or a receive error.
//! 3. On any exit (including task abort) the teardown guard runs
//!    `fail_all`, so no caller waits past connection loss.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::correlator::Correlator;
use crate::diagnostics::Diagnostics;
use crate::transport::FrameSource;

/// Spawn the loop. The returned receiver fires once the task is running.
pub(crate) fn spawn(
    source: Box<dyn FrameSource>,
    correlator: Arc<Correlator>,
    diagnostics: Arc<Diagnostics>,
) -> (JoinHandle<()>, oneshot::Receiver<()>) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let handle = tokio::spawn(run(source, correlator, diagnostics, ready_tx));
    (handle, ready_rx)
}

async fn run(
    mut source: Box<dyn FrameSource>,
    correlator: Arc<Correlator>,
    diagnostics: Arc<Diagnostics>,
    ready: oneshot::Sender<()>,
) {
    let _teardown = FailAllOnExit(Arc::clone(&correlator));
    let _ = ready.send(());

    loop {
        match source.recv().await {
            Ok(Some(text)) => dispatch(&correlator, &diagnostics, &text),
            Ok(None) => {
                info!("transport closed by peer");
                break;
            }
            Err(e) => {
                warn!(error = %e, "transport receive failed");
                break;
            }
        }
    }
}

fn dispatch(correlator: &Correlator, diagnostics: &Diagnostics, text: &str) {
    match frames::decode_inbound(text) {
        Ok(message) => correlator.route(message),
        Err(e) => {
            diagnostics.record_decode_failure();
            warn!(error = %e, len = text.len(), "dropping undecodable frame");
        }
    }
}

struct FailAllOnExit(Arc<Correlator>);

impl Drop for FailAllOnExit {
    fn drop(&mut self) {
        let failed = self.0.fail_all();
        if failed > 0 {
            warn!(failed, "connection lost with requests in flight");
        }
    }
}

#[cfg(test)]
#[path = "receive_test.rs"]
mod tests;
