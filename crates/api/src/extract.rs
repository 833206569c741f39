//! Request extractors shared by the handlers.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::{ActorId, BatchId, OrderId, ProductId};
use uuid::Uuid;

use crate::error::ApiError;

/// Header carrying the caller's identity.
pub const ACTOR_HEADER: &str = "x-actor-id";

/// The request-scoped actor. Identification only; nothing is authenticated.
#[derive(Debug, Clone)]
pub struct Actor(pub ActorId);

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ActorId::new)
            .unwrap_or_else(ActorId::anonymous);
        Ok(Actor(actor))
    }
}

fn parse_uuid(kind: &str, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|e| ApiError::BadRequest(format!("Invalid {kind} ID: {e}")))
}

pub fn parse_product_id(raw: &str) -> Result<ProductId, ApiError> {
    parse_uuid("product", raw).map(ProductId::from_uuid)
}

pub fn parse_batch_id(raw: &str) -> Result<BatchId, ApiError> {
    parse_uuid("batch", raw).map(BatchId::from_uuid)
}

pub fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    parse_uuid("order", raw).map(OrderId::from_uuid)
}
