//! Bounded queue offer with drop policy

use async_channel::{Receiver, Sender, TrySendError};
use contracts::DropPolicy;

/// Outcome of offering one item to a bounded queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Queued without loss
    Queued,
    /// Queued after evicting the oldest queued item
    DroppedOldest,
    /// The offered item was discarded
    DroppedNewest,
    /// The queue is closed
    Closed,
}

impl Offer {
    /// True when an item was lost.
    pub fn is_drop(self) -> bool {
        matches!(self, Offer::DroppedOldest | Offer::DroppedNewest)
    }
}

/// Non-blocking send honoring `policy` when the queue is full.
///
/// `evict` must be a receiver of the same channel; it is only used to pop
/// the oldest item under [`DropPolicy::DropOldest`].
pub fn offer<T>(tx: &Sender<T>, evict: &Receiver<T>, item: T, policy: DropPolicy) -> Offer {
    let item = match tx.try_send(item) {
        Ok(()) => return Offer::Queued,
        Err(TrySendError::Closed(_)) => return Offer::Closed,
        Err(TrySendError::Full(item)) => item,
    };

    match policy {
        DropPolicy::DropNewest => Offer::DroppedNewest,
        DropPolicy::DropOldest => {
            let _ = evict.try_recv();
            match tx.try_send(item) {
                Ok(()) => Offer::DroppedOldest,
                Err(TrySendError::Closed(_)) => Offer::Closed,
                // Another producer refilled the slot
                Err(TrySendError::Full(_)) => Offer::DroppedNewest,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_channel::bounded;

    #[test]
    fn drop_oldest_keeps_newest_items() {
        let (tx, rx) = bounded(2);
        for i in 0..5 {
            offer(&tx, &rx, i, DropPolicy::DropOldest);
        }
        assert_eq!(rx.try_recv().unwrap(), 3);
        assert_eq!(rx.try_recv().unwrap(), 4);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn drop_newest_keeps_oldest_items() {
        let (tx, rx) = bounded(2);
        let outcomes: Vec<_> = (0..4)
            .map(|i| offer(&tx, &rx, i, DropPolicy::DropNewest))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                Offer::Queued,
                Offer::Queued,
                Offer::DroppedNewest,
                Offer::DroppedNewest
            ]
        );
        assert_eq!(rx.try_recv().unwrap(), 0);
        assert_eq!(rx.try_recv().unwrap(), 1);
    }

    #[test]
    fn closed_queue_reports_closed() {
        let (tx, rx) = bounded::<u8>(1);
        tx.close();
        assert_eq!(offer(&tx, &rx, 1, DropPolicy::DropOldest), Offer::Closed);
        assert!(!Offer::Closed.is_drop());
        assert!(Offer::DroppedOldest.is_drop());
    }
}
