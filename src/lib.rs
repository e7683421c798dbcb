pub mod booking;
pub mod bootstrap;
pub mod config;
pub mod domain {
    pub mod context;
    pub mod events;
    pub mod fees;
    pub mod payment;
}
pub mod error;
pub mod gateways;
pub mod http {
    pub mod handlers {
        pub mod admin;
        pub mod ops;
        pub mod payments;
        pub mod webhooks;
    }
    pub mod middleware {
        pub mod admin_auth;
    }
    pub mod router;
}
pub mod repo {
    pub mod in_memory;
    pub mod payments_repo;
}
pub mod service {
    pub mod account_erasure;
    pub mod event_publisher;
    pub mod payment_locks;
    pub mod payment_orchestrator;
}

#[derive(Clone)]
pub struct WebhookSettings {
    pub card_secret: String,
    pub tolerance_secs: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: service::payment_orchestrator::PaymentOrchestrator,
    pub pool: sqlx::PgPool,
    pub redis_client: redis::Client,
    pub webhook: WebhookSettings,
}
