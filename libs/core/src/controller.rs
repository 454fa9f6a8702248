use crate::operation::{Operation, OperationBatch};

use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// How long a non-full batch may accumulate before it is flushed.
pub const BATCH_WINDOW: Duration = Duration::from_secs(3);

/// Executes a single operation against the engine adapter or the resource
/// store. A failed operation is logged by the executor loop and dropped;
/// there is no retry.
#[allow(async_fn_in_trait)]
pub trait OperationDispatcher {
    type Error: std::fmt::Display;

    async fn dispatch(&self, operation: Operation) -> Result<(), Self::Error>;
}

/// Intake half of the operation controller.
///
/// Appends arriving operations to a pending sequence. The first arrival into
/// an empty sequence arms a [`BATCH_WINDOW`] deadline; the sequence is
/// flushed when it reaches `max_batch_size` or the deadline fires, whichever
/// comes first. Flushed snapshots are handed to the executor loop over a
/// channel so intake never blocks on execution. When the operation channel
/// closes, any remaining pending operations are flushed before returning.
pub async fn run_intake(
    mut operations: UnboundedReceiver<Operation>,
    batches: UnboundedSender<OperationBatch>,
    max_batch_size: usize,
) {
    let mut pending: Vec<Operation> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        match deadline {
            None => match operations.recv().await {
                Some(operation) => {
                    deadline = Some(Instant::now() + BATCH_WINDOW);
                    pending.push(operation);
                    if pending.len() >= max_batch_size {
                        flush(&mut pending, &mut deadline, &batches);
                    }
                }
                None => break,
            },
            Some(at) => tokio::select! {
                received = operations.recv() => match received {
                    Some(operation) => {
                        pending.push(operation);
                        if pending.len() >= max_batch_size {
                            flush(&mut pending, &mut deadline, &batches);
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(at) => {
                    flush(&mut pending, &mut deadline, &batches);
                }
            },
        }
    }

    flush(&mut pending, &mut deadline, &batches);
    debug!(msg = "operation intake stopped");
}

fn flush(
    pending: &mut Vec<Operation>,
    deadline: &mut Option<Instant>,
    batches: &UnboundedSender<OperationBatch>,
) {
    *deadline = None;
    if pending.is_empty() {
        return;
    }
    let batch = OperationBatch::partition(std::mem::take(pending));
    debug!(msg = "flushing operation batch", size = batch.len());
    if batches.send(batch).is_err() {
        warn!(msg = "operation executor is gone, dropping batch");
    }
}

/// Execution half of the operation controller.
///
/// Batches execute strictly serially in flush order; within a batch, High
/// priority operations complete before Medium before Low, arrival order
/// preserved within a level.
pub async fn run_executor<D: OperationDispatcher>(
    mut batches: UnboundedReceiver<OperationBatch>,
    dispatcher: D,
) {
    while let Some(batch) = batches.recv().await {
        debug!(msg = "executing operation batch", size = batch.len());
        for operation in batch.into_ordered() {
            let request_id = operation.request_id.clone();
            let kind = operation.payload.kind();
            let name = operation.payload.name();
            if let Err(err) = dispatcher.dispatch(operation).await {
                error!(
                    msg = "operation failed",
                    request_id,
                    kind,
                    name,
                    error = %err,
                );
            }
        }
    }
    debug!(msg = "operation executor stopped");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::operation::OperationPayload;

    use std::sync::{Arc, Mutex};

    use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use tokio::sync::mpsc;

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        }
    }

    fn pod_op(name: &str) -> Operation {
        Operation::new(
            OperationPayload::Pod(Pod {
                metadata: meta(name),
                ..Pod::default()
            }),
            "req",
        )
    }

    fn config_map_op(name: &str) -> Operation {
        Operation::new(
            OperationPayload::ConfigMap(ConfigMap {
                metadata: meta(name),
                ..ConfigMap::default()
            }),
            "req",
        )
    }

    fn service_op(name: &str) -> Operation {
        Operation::new(
            OperationPayload::Service(Service {
                metadata: meta(name),
                ..Service::default()
            }),
            "req",
        )
    }

    #[derive(Clone, Default)]
    struct Recorder {
        executed: Arc<Mutex<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    impl OperationDispatcher for Recorder {
        type Error = String;

        async fn dispatch(&self, operation: Operation) -> Result<(), String> {
            let name = operation.payload.name();
            self.executed.lock().unwrap().push(name.clone());
            match self.fail_on {
                Some(failing) if failing == name => Err("engine unavailable".to_string()),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_flush_on_max_size() {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();

        let intake = tokio::spawn(run_intake(op_rx, batch_tx, 2));

        op_tx.send(pod_op("p1")).unwrap();
        op_tx.send(pod_op("p2")).unwrap();
        op_tx.send(pod_op("p3")).unwrap();

        let first = batch_rx.recv().await.unwrap();
        assert_eq!(first.len(), 2);

        drop(op_tx);
        let second = batch_rx.recv().await.unwrap();
        assert_eq!(second.len(), 1);
        intake.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_window_elapsed() {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();

        let intake = tokio::spawn(run_intake(op_rx, batch_tx, 25));

        op_tx.send(pod_op("p1")).unwrap();
        tokio::time::advance(BATCH_WINDOW).await;

        let batch = batch_rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);

        drop(op_tx);
        intake.await.unwrap();
        assert!(batch_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_flushes_pending() {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();

        op_tx.send(pod_op("p1")).unwrap();
        op_tx.send(config_map_op("c1")).unwrap();
        drop(op_tx);

        run_intake(op_rx, batch_tx, 25).await;

        let batch = batch_rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_executor_priority_order() {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let recorder = Recorder::default();
        let executed = recorder.executed.clone();

        batch_tx
            .send(OperationBatch::partition(vec![
                service_op("s1"),
                pod_op("p1"),
                config_map_op("c1"),
                config_map_op("c2"),
            ]))
            .unwrap();
        drop(batch_tx);

        run_executor(batch_rx, recorder).await;

        assert_eq!(*executed.lock().unwrap(), ["c1", "c2", "p1", "s1"]);
    }

    #[tokio::test]
    async fn test_executor_continues_after_failure() {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let recorder = Recorder {
            fail_on: Some("c1"),
            ..Recorder::default()
        };
        let executed = recorder.executed.clone();

        batch_tx
            .send(OperationBatch::partition(vec![
                config_map_op("c1"),
                pod_op("p1"),
            ]))
            .unwrap();
        drop(batch_tx);

        run_executor(batch_rx, recorder).await;

        assert_eq!(*executed.lock().unwrap(), ["c1", "p1"]);
    }

    #[tokio::test]
    async fn test_intake_accepts_while_executing() {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();

        let intake = tokio::spawn(run_intake(op_rx, batch_tx, 1));

        op_tx.send(pod_op("p1")).unwrap();
        let first = batch_rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);

        // the first batch has not been consumed by any executor yet, intake
        // must still accept and flush new operations
        op_tx.send(pod_op("p2")).unwrap();
        let second = batch_rx.recv().await.unwrap();
        assert_eq!(second.len(), 1);

        drop(op_tx);
        intake.await.unwrap();
    }
}
