use std::{future::Future, pin::Pin, sync::Arc};

use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    PaymentCreditedEvent,
    PaymentDeadLetteredEvent,
    RefundIssuedEvent,
};

/// Callbacks to run for engine events. Register them with the builder methods and hand the hooks to
/// [`EventHandlers::new`].
#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_payment_credited: Option<Handler<PaymentCreditedEvent>>,
    pub on_payment_dead_lettered: Option<Handler<PaymentDeadLetteredEvent>>,
    pub on_refund_issued: Option<Handler<RefundIssuedEvent>>,
}

impl EventHooks {
    pub fn on_payment_credited<F>(&mut self, f: F) -> &mut Self
    where F: Fn(PaymentCreditedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
        self.on_payment_credited = Some(Arc::new(f));
        self
    }

    pub fn on_payment_dead_lettered<F>(&mut self, f: F) -> &mut Self
    where F: Fn(PaymentDeadLetteredEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
        self.on_payment_dead_lettered = Some(Arc::new(f));
        self
    }

    pub fn on_refund_issued<F>(&mut self, f: F) -> &mut Self
    where F: Fn(RefundIssuedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
        self.on_refund_issued = Some(Arc::new(f));
        self
    }
}

pub struct EventHandlers {
    pub on_payment_credited: Option<EventHandler<PaymentCreditedEvent>>,
    pub on_payment_dead_lettered: Option<EventHandler<PaymentDeadLetteredEvent>>,
    pub on_refund_issued: Option<EventHandler<RefundIssuedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        Self {
            on_payment_credited: hooks.on_payment_credited.map(|f| EventHandler::new(buffer_size, f)),
            on_payment_dead_lettered: hooks.on_payment_dead_lettered.map(|f| EventHandler::new(buffer_size, f)),
            on_refund_issued: hooks.on_refund_issued.map(|f| EventHandler::new(buffer_size, f)),
        }
    }

    pub fn producers(&self) -> EventProducers {
        EventProducers {
            payment_credited_producer: self.on_payment_credited.iter().map(EventHandler::subscribe).collect(),
            payment_dead_lettered_producer: self.on_payment_dead_lettered.iter().map(EventHandler::subscribe).collect(),
            refund_issued_producer: self.on_refund_issued.iter().map(EventHandler::subscribe).collect(),
        }
    }

    /// Spawns a task per registered handler. Each task ends once its producers are all dropped.
    pub fn start_handlers(self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(3);
        if let Some(h) = self.on_payment_credited {
            handles.push(tokio::spawn(h.start_handler()));
        }
        if let Some(h) = self.on_payment_dead_lettered {
            handles.push(tokio::spawn(h.start_handler()));
        }
        if let Some(h) = self.on_refund_issued {
            handles.push(tokio::spawn(h.start_handler()));
        }
        handles
    }
}

/// The publishing side, cloned into every API object that emits events.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub payment_credited_producer: Vec<EventProducer<PaymentCreditedEvent>>,
    pub payment_dead_lettered_producer: Vec<EventProducer<PaymentDeadLetteredEvent>>,
    pub refund_issued_producer: Vec<EventProducer<RefundIssuedEvent>>,
}

impl EventProducers {
    pub async fn publish_payment_credited(&self, event: PaymentCreditedEvent) {
        join_all(self.payment_credited_producer.iter().map(|p| p.publish_event(event.clone()))).await;
    }

    pub async fn publish_payment_dead_lettered(&self, event: PaymentDeadLetteredEvent) {
        join_all(self.payment_dead_lettered_producer.iter().map(|p| p.publish_event(event.clone()))).await;
    }

    pub async fn publish_refund_issued(&self, event: RefundIssuedEvent) {
        join_all(self.refund_issued_producer.iter().map(|p| p.publish_event(event.clone()))).await;
    }
}
