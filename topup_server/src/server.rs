use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, web::ServiceConfig, App, HttpServer};
use log::*;
use topup_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    ChargeApi,
    CreditApi,
    InitiationApi,
    ReconciliationApi,
    GatewayClient,
    LockService,
    SqliteDatabase,
    WebhookApi,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    gateway::RestGatewayClient,
    middleware::OperatorKeyMiddlewareFactory,
    reconcile_worker::start_reconcile_worker,
    routes::{
        health,
        CloseChargeRoute,
        DefaultReconcileWindow,
        FulfilChargeRoute,
        GatewayWebhookRoute,
        InitiateTopupRoute,
        OpenChargeRoute,
        PaymentCallbackRoute,
        ReconcileRoute,
        ReplayDeadLettersRoute,
    },
};

/// The lock service the server runs with. Redis serializes credits across server processes; without the `redis`
/// feature, locks only serialize within this process.
#[cfg(feature = "redis")]
pub type ServerLocks = topup_engine::RedisLockService;
#[cfg(not(feature = "redis"))]
pub type ServerLocks = topup_engine::MemoryLockService;

const EVENT_BUFFER_SIZE: usize = 50;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.run_migrations().await?;
    let locks = create_lock_service(&config).await?;
    let gateway = RestGatewayClient::new(&config.gateway)?;
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, default_hooks());
    let producers = handlers.producers();
    let _handles = handlers.start_handlers();
    let context = ServerContext { config, db, locks, gateway, producers };
    let config = &context.config;
    let _worker =
        start_reconcile_worker(context.reconciliation_api(), config.reconcile_interval, config.reconcile_days_back);
    let srv = create_server_instance(context)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

#[cfg(feature = "redis")]
async fn create_lock_service(config: &ServerConfig) -> Result<ServerLocks, ServerError> {
    let url = config.redis_url.as_deref().ok_or_else(|| {
        ServerError::ConfigurationError("TOPUP_REDIS_URL must be set for the redis lock service".into())
    })?;
    ServerLocks::new(url).await.map_err(|e| ServerError::InitializeError(e.to_string()))
}

#[cfg(not(feature = "redis"))]
async fn create_lock_service(config: &ServerConfig) -> Result<ServerLocks, ServerError> {
    if config.redis_url.is_some() {
        warn!("🔒️ TOPUP_REDIS_URL is set, but the server was built without the redis feature. Using in-process locks.");
    } else {
        info!("🔒️ Using in-process locks. Run a single server process, or build with the redis feature.");
    }
    Ok(ServerLocks::new())
}

/// Dead letters need a human, so they are logged at error level where alerting picks them up.
fn default_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks
        .on_payment_dead_lettered(|ev| {
            Box::pin(async move {
                error!(
                    "📬️ Webhook for {} was dead-lettered as #{} after {} attempts: {}",
                    ev.reference.as_deref().unwrap_or("an unknown payment"),
                    ev.dead_letter_id,
                    ev.attempts,
                    ev.error_message
                );
            })
        })
        .on_refund_issued(|ev| {
            Box::pin(async move {
                info!("📬️ Refunded {} to user {} for charge #{}", ev.amount, ev.user_id, ev.charge_id);
            })
        });
    hooks
}

/// Everything the routes need. Shared by the server and its endpoint tests, so both run the same route table.
#[derive(Clone)]
pub struct ServerContext<L, G> {
    pub config: ServerConfig,
    pub db: SqliteDatabase,
    pub locks: L,
    pub gateway: G,
    pub producers: EventProducers,
}

impl<L, G> ServerContext<L, G>
where
    L: LockService + 'static,
    G: GatewayClient + 'static,
{
    pub fn credit_api(&self) -> CreditApi<SqliteDatabase, L> {
        CreditApi::new(self.db.clone(), self.locks.clone(), self.producers.clone()).with_settings(self.config.credit)
    }

    pub fn reconciliation_api(&self) -> ReconciliationApi<SqliteDatabase, L> {
        ReconciliationApi::new(self.credit_api(), self.producers.clone())
            .with_pending_timeout(self.config.pending_charge_timeout)
    }

    pub fn webhook_api(&self) -> WebhookApi<SqliteDatabase, L> {
        WebhookApi::new(self.credit_api(), self.config.webhook.secret.clone(), self.producers.clone())
            .with_retry_policy(self.config.retry)
    }

    /// Registers the API objects and every route on `cfg`.
    pub fn configure(&self, cfg: &mut ServiceConfig) {
        let initiation_api =
            InitiationApi::new(self.db.clone(), self.gateway.clone()).with_max_topup(self.config.max_topup);
        cfg.app_data(web::Data::new(self.webhook_api()))
            .app_data(web::Data::new(self.reconciliation_api()))
            .app_data(web::Data::new(initiation_api))
            .app_data(web::Data::new(ChargeApi::new(self.db.clone())))
            .app_data(web::Data::new(self.gateway.clone()))
            .app_data(web::Data::new(self.config.webhook.clone()))
            .app_data(web::Data::new(DefaultReconcileWindow(self.config.reconcile_days_back)));
        // Routes for the application backend and operators
        let api_scope = web::scope("/api")
            .wrap(OperatorKeyMiddlewareFactory::new(self.config.operator_key.clone()))
            .service(InitiateTopupRoute::<SqliteDatabase, G>::new())
            .service(OpenChargeRoute::<SqliteDatabase>::new())
            .service(FulfilChargeRoute::<SqliteDatabase>::new())
            .service(CloseChargeRoute::<SqliteDatabase>::new())
            .service(ReconcileRoute::<SqliteDatabase, L>::new())
            .service(ReplayDeadLettersRoute::<SqliteDatabase, L>::new());
        cfg.service(health)
            .service(GatewayWebhookRoute::<SqliteDatabase, L>::new())
            .service(PaymentCallbackRoute::<SqliteDatabase, L, G>::new())
            .service(api_scope);
    }
}

pub fn create_server_instance(context: ServerContext<ServerLocks, RestGatewayClient>) -> Result<Server, ServerError> {
    let host = context.config.host.clone();
    let port = context.config.port;
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("topup::access_log"))
            .configure(|cfg| context.configure(cfg))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}
