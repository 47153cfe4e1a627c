use tokio::sync::broadcast;

/// Which collection a committed mutation touched.
///
/// Subscribers re-derive their queries from the latest snapshot on every
/// event; the payload deliberately carries no row data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Folders,
    Notes,
    History,
    Settings,
}

const CHANNEL_CAPACITY: usize = 64;

/// Post-commit change broadcaster. A lagging or absent subscriber never
/// blocks a write.
#[derive(Debug)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ChangeEvent) {
        // send only errors when no receiver is subscribed
        let _ = self.tx.send(event);
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
