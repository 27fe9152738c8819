//! # ilp-service
//!
//! The forwarding pipeline that turns an inbound Prepare into a Fulfill or
//! Reject: a chain of `IncomingService`/`OutgoingService` middleware layers
//! (validation, local delivery, routing, balances, expiry, BTP dispatch)
//! composed the way the teacher corpus builds a connector's service stack,
//! one small struct per concern rather than a single monolithic function.

mod balance;
mod btp_send;
mod expiry;
mod local_delivery;
mod pipeline;
mod reject;
mod router_service;
mod types;
mod validator;

pub use self::balance::BalanceService;
pub use self::btp_send::BtpSendService;
pub use self::expiry::{ExpiryShortenerService, DEFAULT_HOP_EXPIRY_BUDGET_MS, MIN_OUTGOING_EXPIRY_WINDOW_MS};
pub use self::local_delivery::{LocalDeliveryHandler, LocalDeliveryOutcome, LocalDeliveryService};
pub use self::pipeline::{
    build_pipeline, build_pipeline_with_budget, build_pipeline_with_prefix, ForwardingPipeline, LocalDeliveryLayer,
    PipelineRequestHandler,
};
pub use self::reject::reject;
pub use self::router_service::RouterService;
pub use self::types::{IlpResult, IncomingRequest, IncomingService, OutgoingRequest, OutgoingService};
pub use self::validator::ValidatorService;
