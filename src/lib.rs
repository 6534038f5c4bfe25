pub mod config;
pub mod domain {
    pub mod audit;
    pub mod event;
    pub mod ledger;
    pub mod order;
    pub mod payout_config;
    pub mod refund;
    pub mod transfer;
}
pub mod error;
pub mod gateways;
pub mod http {
    pub mod handlers {
        pub mod admin;
        pub mod ledger;
        pub mod ops;
        pub mod orders;
        pub mod webhooks;
    }
    pub mod middleware {
        pub mod admin_auth;
    }
    pub mod routes;
}
pub mod repo;
pub mod service {
    pub mod audit;
    pub mod notifier;
    pub mod order_ledger;
    pub mod payout_config_cache;
    pub mod payout_ledger;
    pub mod reconciliation;
    pub mod refund_manager;
    pub mod transfer_manager;
    pub mod webhook_gateway;
}
pub mod split;

use crate::config::AppConfig;
use crate::gateways::{PayoutGateway, RetryPolicy};
use crate::repo::memory::InMemoryStore;
use crate::repo::{
    AuditStore, LedgerStore, OrderStore, PaymentEventStore, PayoutConfigStore, RefundStore, RetryQueue,
    TransferStore,
};
use crate::service::audit::AuditLogger;
use crate::service::notifier::OutcomeRouter;
use crate::service::order_ledger::{OrderLedger, SplitSettings};
use crate::service::payout_config_cache::PayoutConfigCache;
use crate::service::payout_ledger::PayoutLedger;
use crate::service::reconciliation::ReconciliationWorker;
use crate::service::refund_manager::RefundManager;
use crate::service::transfer_manager::TransferManager;
use crate::service::webhook_gateway::{WebhookGateway, WebhookSettings};
use secrecy::SecretString;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

const PAYOUT_CONFIG_TTL: Duration = Duration::from_secs(300);

/// One handle per persistence seam.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub transfers: Arc<dyn TransferStore>,
    pub refunds: Arc<dyn RefundStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub events: Arc<dyn PaymentEventStore>,
    pub payout_configs: Arc<dyn PayoutConfigStore>,
    pub retry_queue: Arc<dyn RetryQueue>,
    pub audit: Arc<dyn AuditStore>,
}

impl Stores {
    pub fn postgres(pool: &PgPool) -> Self {
        use crate::repo::{
            audit_repo::AuditRepo, ledger_repo::LedgerRepo, orders_repo::OrdersRepo,
            payment_events_repo::PaymentEventsRepo, payout_config_repo::PayoutConfigRepo,
            refunds_repo::RefundsRepo, retry_jobs_repo::RetryJobsRepo, transfers_repo::TransfersRepo,
        };

        Self {
            orders: Arc::new(OrdersRepo { pool: pool.clone() }),
            transfers: Arc::new(TransfersRepo { pool: pool.clone() }),
            refunds: Arc::new(RefundsRepo { pool: pool.clone() }),
            ledger: Arc::new(LedgerRepo { pool: pool.clone() }),
            events: Arc::new(PaymentEventsRepo { pool: pool.clone() }),
            payout_configs: Arc::new(PayoutConfigRepo { pool: pool.clone() }),
            retry_queue: Arc::new(RetryJobsRepo { pool: pool.clone() }),
            audit: Arc::new(AuditRepo { pool: pool.clone() }),
        }
    }

    pub fn in_memory(store: &InMemoryStore) -> Self {
        Self {
            orders: Arc::new(store.clone()),
            transfers: Arc::new(store.clone()),
            refunds: Arc::new(store.clone()),
            ledger: Arc::new(store.clone()),
            events: Arc::new(store.clone()),
            payout_configs: Arc::new(store.clone()),
            retry_queue: Arc::new(store.clone()),
            audit: Arc::new(store.clone()),
        }
    }
}

#[derive(Clone)]
pub struct EngineSettings {
    pub split: SplitSettings,
    pub webhook: WebhookSettings,
    pub webhook_secret: Option<SecretString>,
    pub gateway_retry: RetryPolicy,
    pub transfer_hold_days: Option<i64>,
}

impl EngineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            split: SplitSettings::from_percent(
                cfg.platform_commission_percent,
                cfg.gateway_fee_basis_points,
                &cfg.settlement_currency,
            ),
            webhook: WebhookSettings {
                source: cfg.webhook_source.clone(),
                replay_check: cfg.replay_check,
                max_age_secs: cfg.replay_max_age_secs,
                max_skew_secs: cfg.replay_max_skew_secs,
            },
            webhook_secret: cfg.webhook_secret.clone(),
            gateway_retry: RetryPolicy::new(cfg.gateway_max_attempts, cfg.gateway_backoff_ms),
            transfer_hold_days: cfg.transfer_hold_days,
        }
    }
}

/// The wired managers. Both binaries and the tests build one of these.
#[derive(Clone)]
pub struct Engine {
    pub orders: OrderLedger,
    pub transfers: TransferManager,
    pub refunds: RefundManager,
    pub ledger: PayoutLedger,
    pub webhooks: WebhookGateway,
    pub retry_queue: Arc<dyn RetryQueue>,
    pub audit: Arc<dyn AuditLogger>,
}

impl Engine {
    pub fn build(
        stores: &Stores,
        settings: EngineSettings,
        gateway: Arc<dyn PayoutGateway>,
        audit: Arc<dyn AuditLogger>,
        notifier: OutcomeRouter,
    ) -> Self {
        let payout_configs = PayoutConfigCache::new(stores.payout_configs.clone(), PAYOUT_CONFIG_TTL);
        let ledger = PayoutLedger::new(stores.ledger.clone());

        let orders = OrderLedger {
            orders: stores.orders.clone(),
            payout_configs: payout_configs.clone(),
            gateway: gateway.clone(),
            audit: audit.clone(),
            retry: settings.gateway_retry,
            settings: settings.split,
        };
        let transfers = TransferManager {
            orders: orders.clone(),
            transfers: stores.transfers.clone(),
            refunds: stores.refunds.clone(),
            payout_configs,
            ledger: ledger.clone(),
            gateway: gateway.clone(),
            audit: audit.clone(),
            retry: settings.gateway_retry,
            hold_days: settings.transfer_hold_days,
        };
        let refunds = RefundManager {
            orders: orders.clone(),
            transfers: transfers.clone(),
            refunds: stores.refunds.clone(),
            gateway,
            audit: audit.clone(),
            retry: settings.gateway_retry,
        };
        let webhooks = WebhookGateway {
            secret: settings.webhook_secret,
            settings: settings.webhook,
            events: stores.events.clone(),
            retry_queue: stores.retry_queue.clone(),
            orders: orders.clone(),
            transfers: transfers.clone(),
            refunds: refunds.clone(),
            notifier,
            audit: audit.clone(),
        };

        Self {
            orders,
            transfers,
            refunds,
            ledger,
            webhooks,
            retry_queue: stores.retry_queue.clone(),
            audit,
        }
    }

    pub fn reconciliation_worker(&self, max_attempts: i32, poll_interval: Duration) -> ReconciliationWorker {
        ReconciliationWorker {
            queue: self.retry_queue.clone(),
            webhooks: self.webhooks.clone(),
            audit: self.audit.clone(),
            max_attempts,
            poll_interval,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderLedger,
    pub transfers: TransferManager,
    pub refunds: RefundManager,
    pub ledger: PayoutLedger,
    pub webhooks: WebhookGateway,
    /// Probed by readiness; absent when running on in-memory stores.
    pub pool: Option<PgPool>,
    pub redis_client: Option<redis::Client>,
}

impl AppState {
    pub fn new(engine: &Engine) -> Self {
        Self {
            orders: engine.orders.clone(),
            transfers: engine.transfers.clone(),
            refunds: engine.refunds.clone(),
            ledger: engine.ledger.clone(),
            webhooks: engine.webhooks.clone(),
            pool: None,
            redis_client: None,
        }
    }

    pub fn with_backends(mut self, pool: PgPool, redis_client: redis::Client) -> Self {
        self.pool = Some(pool);
        self.redis_client = Some(redis_client);
        self
    }
}
