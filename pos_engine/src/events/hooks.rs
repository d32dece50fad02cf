use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, Handler, PaymentStatusEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub payment_status_producers: Vec<EventProducer<PaymentStatusEvent>>,
}

impl EventProducers {
    pub async fn publish_payment_status(&self, event: PaymentStatusEvent) {
        for producer in &self.payment_status_producers {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_payment_status: Option<EventHandler<PaymentStatusEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_payment_status = hooks.on_payment_status.map(|f| EventHandler::new(buffer_size, f));
        Self { on_payment_status }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_payment_status {
            result.payment_status_producers.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_payment_status {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_payment_status: Option<Handler<PaymentStatusEvent>>,
}

impl EventHooks {
    pub fn on_payment_status<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentStatusEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payment_status = Some(Arc::new(f));
        self
    }
}
