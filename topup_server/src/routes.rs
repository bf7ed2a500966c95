//! Request handler definitions
//!
//! Define each route and its handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Crediting waits on locks and backs off between retries, so every
//! handler here is async and awaits those waits rather than blocking on them.
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use log::*;
use serde::de::DeserializeOwned;
use topup_engine::{
    db_types::PaymentReference,
    traits::{ChargeManagement, DeadLetterChannel, GatewayClient, LedgerStore, LockService},
    ChargeApi,
    InitiationApi,
    ReconciliationApi,
    WebhookApi,
    WebhookOutcome,
};

use crate::{
    config::WebhookOptions,
    data_objects::{
        CallbackQuery,
        CloseChargeRequest,
        FulfilChargeRequest,
        OpenChargeRequest,
        ReconcileParams,
        ReplayParams,
        TopupRequest,
        DEFAULT_REPLAY_LIMIT,
    },
    errors::ServerError,
};

/// The look-back window of a reconciliation run when the request does not give one.
#[derive(Debug, Clone, Copy)]
pub struct DefaultReconcileWindow(pub i64);

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
//
// `impl` routes take one type parameter per trait bound. Routes whose handlers need several bounds on one type
// parameter list them explicitly, e.g. `<B: LedgerStore + DeadLetterChannel, L: LockService>`.
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };

    ($name:ident => $method:ident $path:literal <$($param:ident: $bound:ident $(+ $more:ident)*),+>) => {
        paste::paste! { pub struct [<$name:camel Route>]< $($param,)+ >( $( core::marker::PhantomData<fn() -> $param>,)+ );}
        paste::paste! { impl< $($param,)+ > [<$name:camel Route>]< $($param,)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> $param>,)+)
            }
        }}
        paste::paste! { impl< $($param,)+ > actix_web::dev::HttpServiceFactory for [<$name:camel Route>]< $($param,)+ >
        where
            $($param: $bound $(+ $more)* + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $($param,)+ >);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Webhooks  ----------------------------------------------------
route!(gateway_webhook => Post "/webhooks/gateway" <B: LedgerStore + DeadLetterChannel, L: LockService>);
/// Receives payment notifications from the gateway.
///
/// The body is taken as raw bytes, because the signature in the configured header is computed over the exact bytes
/// the gateway sent. Any re-serialization would break it.
///
/// Responses:
/// * 200 with the outcome for events that were credited, were duplicates, were recorded as failures or were ignored.
/// * 401 if the signature is missing or wrong. Nothing is stored.
/// * 400 if the body is not a gateway event.
/// * Events that exhausted their retries were dead-lettered. They are acknowledged with a 200 unless
///   `TOPUP_ACK_DEAD_LETTERS` is off, in which case the gateway gets a 500 and redelivers.
pub async fn gateway_webhook<B, L>(
    req: HttpRequest,
    body: web::Bytes,
    api: web::Data<WebhookApi<B, L>>,
    options: web::Data<WebhookOptions>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore + DeadLetterChannel,
    L: LockService,
{
    trace!("💻️ Received gateway webhook ({} bytes)", body.len());
    let signature = req.headers().get(options.signature_header.as_str()).and_then(|v| v.to_str().ok());
    let outcome = api.process_webhook(&body, signature).await?;
    debug!("💻️ Webhook outcome: {outcome:?}");
    match outcome {
        WebhookOutcome::DeadLettered { dead_letter_id, error, .. } if !options.ack_dead_letters => {
            Err(ServerError::DeadLettered(format!("Dead letter #{dead_letter_id}: {error}")))
        },
        outcome => Ok(HttpResponse::Ok().json(outcome)),
    }
}

route!(payment_callback => Get "/topups/callback" <B: LedgerStore + DeadLetterChannel, L: LockService, G: GatewayClient>);
/// The gateway redirects the user here after the payment page. The reference is confirmed with the gateway before
/// anything is credited, so a forged redirect cannot credit an unpaid top-up.
pub async fn payment_callback<B, L, G>(
    query: web::Query<CallbackQuery>,
    api: web::Data<WebhookApi<B, L>>,
    gateway: web::Data<G>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore + DeadLetterChannel,
    L: LockService,
    G: GatewayClient,
{
    let reference = query
        .reference()
        .map(PaymentReference::from)
        .ok_or_else(|| ServerError::InvalidRequestPath("The callback carries no payment reference".into()))?;
    debug!("💻️ Payment callback for {reference}");
    let outcome = api.process_callback(gateway.as_ref(), &reference).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

//----------------------------------------------   Top-ups  ----------------------------------------------------
route!(initiate_topup => Post "/topups" impl LedgerStore, GatewayClient);
/// Starts a top-up. Returns the gateway's checkout URL. Sending the same `idempotency_key` again returns the original
/// top-up rather than starting a second one.
pub async fn initiate_topup<B, G>(
    body: web::Json<TopupRequest>,
    api: web::Data<InitiationApi<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore,
    G: GatewayClient,
{
    let TopupRequest { user_id, amount, idempotency_key } = body.into_inner();
    debug!("💻️ POST top-up of {amount} for user {user_id}");
    let initiation = api.initiate(user_id, amount, idempotency_key).await?;
    Ok(HttpResponse::Ok().json(initiation))
}

//----------------------------------------------   Charges  ----------------------------------------------------
route!(open_charge => Post "/charges" impl ChargeManagement);
pub async fn open_charge<B: ChargeManagement>(
    body: web::Json<OpenChargeRequest>,
    api: web::Data<ChargeApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let OpenChargeRequest { user_id, cost, description } = body.into_inner();
    debug!("💻️ POST charge of {cost} for user {user_id}");
    let (charge, debit) = api.open_charge(user_id, cost, description).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "charge": charge, "debit": debit })))
}

route!(fulfil_charge => Post "/charges/{id}/fulfil" impl ChargeManagement);
pub async fn fulfil_charge<B: ChargeManagement>(
    path: web::Path<i64>,
    body: web::Json<FulfilChargeRequest>,
    api: web::Data<ChargeApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    debug!("💻️ POST fulfil charge #{id}");
    let charge = api.fulfil_charge(id, &body.marker).await?;
    Ok(HttpResponse::Ok().json(charge))
}

route!(close_charge => Post "/charges/{id}/close" impl ChargeManagement);
/// Closes a charge that will not be delivered. The debit is returned by the next reconciliation run, not here.
pub async fn close_charge<B: ChargeManagement>(
    path: web::Path<i64>,
    body: web::Json<CloseChargeRequest>,
    api: web::Data<ChargeApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    debug!("💻️ POST close charge #{id} as {}", body.status);
    let charge = api.close_charge(id, body.status).await?;
    Ok(HttpResponse::Ok().json(charge))
}

//----------------------------------------------   Operations  ----------------------------------------------------
route!(reconcile => Post "/reconcile" <B: LedgerStore + ChargeManagement, L: LockService>);
/// Runs the refund reconciler now. The body is optional: `{"days_back": 7, "dry_run": true}`.
pub async fn reconcile<B, L>(
    body: web::Bytes,
    api: web::Data<ReconciliationApi<B, L>>,
    default_window: web::Data<DefaultReconcileWindow>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore + ChargeManagement,
    L: LockService,
{
    let params: ReconcileParams = optional_body(&body)?;
    let days_back = params.days_back.unwrap_or(default_window.0);
    if days_back <= 0 {
        return Err(ServerError::InvalidRequestBody(format!("days_back must be positive, got {days_back}")));
    }
    let lookback = chrono::Duration::try_days(days_back)
        .ok_or_else(|| ServerError::InvalidRequestBody(format!("days_back is too large, got {days_back}")))?;
    let mode = if params.dry_run { " (dry run)" } else { "" };
    info!("💻️ Reconciliation requested over the last {days_back} days{mode}");
    let report = api.reconcile(lookback, params.dry_run).await?;
    Ok(HttpResponse::Ok().json(report))
}

route!(replay_dead_letters => Post "/dead_letters/replay" <B: LedgerStore + DeadLetterChannel, L: LockService>);
pub async fn replay_dead_letters<B, L>(
    body: web::Bytes,
    api: web::Data<WebhookApi<B, L>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore + DeadLetterChannel,
    L: LockService,
{
    let params: ReplayParams = optional_body(&body)?;
    let limit = params.limit.unwrap_or(DEFAULT_REPLAY_LIMIT);
    if limit <= 0 {
        return Err(ServerError::InvalidRequestBody(format!("limit must be positive, got {limit}")));
    }
    info!("💻️ Dead letter replay requested (up to {limit})");
    let report = api.replay_dead_letters(limit).await?;
    Ok(HttpResponse::Ok().json(report))
}

/// Operator bodies are optional. An empty body means "all defaults", but a body that is present must be valid.
fn optional_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ServerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ServerError::InvalidRequestBody(e.to_string()))
}
