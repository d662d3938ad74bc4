//! The runtime adapter contract.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::RuntimeError;
use crate::spec::{ContainerSpec, OutputChunk, PullProgress, WaitResponse};

/// Receiving half of a container wait: one channel for the exit response and
/// one for a wait failure, mirroring the daemon client's next-exit wait.
pub struct WaitChannels {
    pub response: oneshot::Receiver<WaitResponse>,
    pub error: oneshot::Receiver<RuntimeError>,
}

/// Sending half of a container wait, held by runtime implementations.
pub struct WaitSenders {
    pub response: oneshot::Sender<WaitResponse>,
    pub error: oneshot::Sender<RuntimeError>,
}

/// The folded outcome of a container wait.
#[derive(Debug)]
pub enum WaitEvent {
    /// The container exited with the given status.
    Exited(WaitResponse),
    /// The wait itself failed.
    Failed(RuntimeError),
    /// The runtime dropped both wait channels without reporting anything.
    Closed,
}

impl WaitChannels {
    /// Create a connected sender/receiver pair.
    pub fn pair() -> (WaitSenders, WaitChannels) {
        let (response_tx, response_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        (
            WaitSenders {
                response: response_tx,
                error: error_tx,
            },
            WaitChannels {
                response: response_rx,
                error: error_rx,
            },
        )
    }

    /// Wait for whichever channel fires. A dropped sender on one side defers
    /// to the other, so an implementation that reports on one channel and
    /// drops the other never produces a spurious outcome.
    pub async fn next_event(self) -> WaitEvent {
        let WaitChannels {
            mut response,
            mut error,
        } = self;
        tokio::select! {
            resp = &mut response => match resp {
                Ok(resp) => WaitEvent::Exited(resp),
                Err(_) => match error.await {
                    Ok(err) => WaitEvent::Failed(err),
                    Err(_) => WaitEvent::Closed,
                },
            },
            err = &mut error => match err {
                Ok(err) => WaitEvent::Failed(err),
                Err(_) => match response.await {
                    Ok(resp) => WaitEvent::Exited(resp),
                    Err(_) => WaitEvent::Closed,
                },
            },
        }
    }
}

/// The minimal daemon surface the engine consumes.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the image is already present on the host.
    async fn image_present(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Start pulling an image; status messages stream until completion, a
    /// terminal `Err` item reports a failed pull.
    async fn image_pull(&self, image: &str)
        -> mpsc::Receiver<Result<PullProgress, RuntimeError>>;

    /// Create (but do not start) a container. Returns its id.
    async fn container_create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn container_start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Attach to a container's output streams. The channel closes when the
    /// stream ends.
    async fn container_attach(
        &self,
        id: &str,
    ) -> Result<mpsc::Receiver<OutputChunk>, RuntimeError>;

    /// Register a next-exit wait. Registration failures surface on the error
    /// channel.
    async fn container_wait(&self, id: &str) -> WaitChannels;

    async fn container_remove(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    async fn volume_create(&self, name: &str) -> Result<(), RuntimeError>;

    async fn volume_remove(&self, name: &str, force: bool) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn next_event_prefers_the_side_that_reports() {
        let (senders, channels) = WaitChannels::pair();
        senders
            .response
            .send(WaitResponse { status_code: 0 })
            .unwrap();
        drop(senders.error);
        match channels.next_event().await {
            WaitEvent::Exited(resp) => assert_eq!(resp.status_code, 0),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn next_event_surfaces_wait_failures() {
        let (senders, channels) = WaitChannels::pair();
        senders
            .error
            .send(RuntimeError::api(anyhow::anyhow!("wait interrupted")))
            .ok();
        drop(senders.response);
        match channels.next_event().await {
            WaitEvent::Failed(err) => assert!(err.to_string().contains("daemon api")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn next_event_reports_closed_when_both_sides_drop() {
        let (senders, channels) = WaitChannels::pair();
        drop(senders);
        assert!(matches!(channels.next_event().await, WaitEvent::Closed));
    }
}
