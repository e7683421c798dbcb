use crate::booking::http::HttpBookingClient;
use crate::config::AppConfig;
use crate::domain::payment::PaymentMethod;
use crate::gateways::card::CardGateway;
use crate::gateways::mock::MockGateway;
use crate::gateways::wallet::{TokenCache, WalletGateway};
use crate::gateways::GatewayRegistry;
use crate::repo::payments_repo::PgPaymentsRepo;
use crate::service::event_publisher::RedisStreamPublisher;
use crate::service::payment_locks::PaymentLocks;
use crate::service::payment_orchestrator::{CheckoutUrls, PaymentOrchestrator};
use sqlx::PgPool;
use std::sync::Arc;

pub fn gateway_registry(cfg: &AppConfig, client: &reqwest::Client) -> GatewayRegistry {
    let card = Arc::new(CardGateway {
        base_url: cfg.card_gateway_base_url.clone(),
        secret_key: cfg.card_gateway_secret_key.clone(),
        timeout_ms: cfg.gateway_timeout_ms,
        client: client.clone(),
    });
    let wallet = Arc::new(WalletGateway {
        base_url: cfg.wallet_gateway_base_url.clone(),
        client_id: cfg.wallet_client_id.clone(),
        client_secret: cfg.wallet_client_secret.clone(),
        timeout_ms: cfg.gateway_timeout_ms,
        client: client.clone(),
        token_cache: TokenCache::default(),
    });

    let registry = GatewayRegistry::new()
        .register(PaymentMethod::Card, card)
        .register(PaymentMethod::Wallet, wallet);

    match &cfg.mock_gateway_behavior {
        Some(behavior) => {
            tracing::warn!(behavior = %behavior, "mock gateway registered for OTHER payments");
            registry.register(PaymentMethod::Other, Arc::new(MockGateway::new("mock", behavior)))
        }
        None => registry,
    }
}

pub fn build_orchestrator(
    cfg: &AppConfig,
    pool: PgPool,
    redis_client: redis::Client,
) -> PaymentOrchestrator {
    let client = reqwest::Client::new();
    let booking = HttpBookingClient {
        base_url: cfg.booking_service_url.trim_end_matches('/').to_string(),
        service_token: cfg.booking_service_token.clone(),
        timeout_ms: cfg.booking_timeout_ms,
        client: client.clone(),
    };

    PaymentOrchestrator {
        store: Arc::new(PgPaymentsRepo { pool }),
        gateways: gateway_registry(cfg, &client),
        booking: Arc::new(booking),
        events: Arc::new(RedisStreamPublisher::new(redis_client)),
        locks: PaymentLocks::new(),
        urls: CheckoutUrls {
            return_url: cfg.checkout_return_url.clone(),
            cancel_url: cfg.checkout_cancel_url.clone(),
        },
    }
}
