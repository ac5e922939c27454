use crate::error::{Result, ScalarError};
use crate::notification::ChangeEvent;
use tokio::sync::broadcast;

/// Receiver for every event dispatched by a device
pub struct EventReceiver {
    rx: broadcast::Receiver<ChangeEvent>,
}

impl EventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// Fails with `Closed` once the device is gone, and with `Lagged` when events
    /// were dropped because this receiver fell behind.
    pub async fn recv(&mut self) -> Result<ChangeEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => ScalarError::Closed,
            broadcast::error::RecvError::Lagged(n) => ScalarError::Lagged(n),
        })
    }

    /// Receive an event without waiting
    ///
    /// Returns `None` if no event is queued.
    pub fn try_recv(&mut self) -> Result<Option<ChangeEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(ScalarError::Closed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(ScalarError::Lagged(n)),
        }
    }
}
