//! In-process pub-sub for engine events.
//!
//! Any number of [`EventProducer`]s feed one [`EventHandler`], which runs an async callback for every event it
//! receives. Callbacks only see the event itself. They run concurrently, and the handler waits for all of them to
//! finish once the last producer has been dropped.
use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::{sync::mpsc, task::JoinSet};

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    receiver: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        Self { receiver, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer { sender: self.sender.clone() }
    }

    /// Runs until every producer has been dropped and every in-flight callback has completed.
    pub async fn start_handler(self) {
        let Self { mut receiver, sender, handler } = self;
        // Only producers keep the channel open from here on
        drop(sender);
        debug!("📬️ Event handler started");
        let mut jobs = JoinSet::new();
        while let Some(event) = receiver.recv().await {
            let handler = Arc::clone(&handler);
            jobs.spawn(async move { (handler)(event).await });
            // Reap finished callbacks so the set does not grow without bound
            while let Some(done) = jobs.try_join_next() {
                if let Err(e) = done {
                    warn!("📬️ An event callback panicked or was cancelled: {e}");
                }
            }
        }
        while let Some(done) = jobs.join_next().await {
            if let Err(e) = done {
                warn!("📬️ An event callback panicked or was cancelled: {e}");
            }
        }
        debug!("📬️ Event handler has shut down");
    }
}

#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    sender: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    /// Publishing never fails the caller. If the handler has gone away the event is logged and dropped.
    pub async fn publish_event(&self, event: E) {
        if self.sender.send(event).await.is_err() {
            error!("📬️ Event handler is gone. An event was dropped.");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;

    #[tokio::test]
    async fn every_published_event_is_handled_before_shutdown() {
        let _ = env_logger::try_init();
        let total = Arc::new(AtomicI64::new(0));
        let seen = total.clone();
        let handler: Handler<i64> = Arc::new(move |cents| {
            let total = total.clone();
            Box::pin(async move {
                tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
                total.fetch_add(cents, Ordering::SeqCst);
            })
        });
        let event_handler = EventHandler::new(1, handler);
        for offset in [0, 100] {
            let producer = event_handler.subscribe();
            tokio::spawn(async move {
                for i in 1..=4 {
                    producer.publish_event(offset + i).await;
                }
            });
        }
        event_handler.start_handler().await;
        assert_eq!(seen.load(Ordering::SeqCst), 10 + 410);
    }
}
