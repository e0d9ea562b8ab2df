use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    OrderPaidEvent,
    TransferUnmatchedEvent,
    WithdrawalEvent,
};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub order_paid_producer: Vec<EventProducer<OrderPaidEvent>>,
    pub transfer_unmatched_producer: Vec<EventProducer<TransferUnmatchedEvent>>,
    pub withdrawal_producer: Vec<EventProducer<WithdrawalEvent>>,
}

pub struct EventHandlers {
    pub on_order_paid: Option<EventHandler<OrderPaidEvent>>,
    pub on_transfer_unmatched: Option<EventHandler<TransferUnmatchedEvent>>,
    pub on_withdrawal_change: Option<EventHandler<WithdrawalEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_order_paid = hooks.on_order_paid.map(|f| EventHandler::new(buffer_size, f));
        let on_transfer_unmatched = hooks.on_transfer_unmatched.map(|f| EventHandler::new(buffer_size, f));
        let on_withdrawal_change = hooks.on_withdrawal_change.map(|f| EventHandler::new(buffer_size, f));
        Self { on_order_paid, on_transfer_unmatched, on_withdrawal_change }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_order_paid {
            result.order_paid_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_transfer_unmatched {
            result.transfer_unmatched_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_withdrawal_change {
            result.withdrawal_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_order_paid {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_transfer_unmatched {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_withdrawal_change {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_order_paid: Option<Handler<OrderPaidEvent>>,
    pub on_transfer_unmatched: Option<Handler<TransferUnmatchedEvent>>,
    pub on_withdrawal_change: Option<Handler<WithdrawalEvent>>,
}

impl EventHooks {
    pub fn on_order_paid<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderPaidEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_paid = Some(Arc::new(f));
        self
    }

    pub fn on_transfer_unmatched<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TransferUnmatchedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_transfer_unmatched = Some(Arc::new(f));
        self
    }

    pub fn on_withdrawal_change<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(WithdrawalEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_withdrawal_change = Some(Arc::new(f));
        self
    }
}
