use crate::error::AppError;
use crate::rate_limit::RouteLimiter;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, ResponseError,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    sync::Arc,
};
use tracing::warn;

/// Rejects requests over a route's ceilings before they reach the handler.
///
/// Wrap it around a single resource at registration time:
///
/// ```ignore
/// web::resource("/upload")
///     .wrap(RateLimit::new(state.rate_limits.upload.clone()))
///     .route(web::post().to(upload_level))
/// ```
///
/// Clients are keyed by the peer IP of the connection. Forwarded-for headers
/// are ignored, so one client cannot pose as many.
pub struct RateLimit {
    limiter: Arc<RouteLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<RouteLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware {
            service,
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: S,
    limiter: Arc<RouteLimiter>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let client = client_key(&req);

        if let Err(exceeded) = self.limiter.check(&client) {
            warn!(
                route = self.limiter.route(),
                client = %client,
                limit = %exceeded.limit,
                retry_after_secs = exceeded.retry_after.as_secs(),
                "Rate limit exceeded"
            );
            let response = AppError::from(exceeded).error_response();
            return Box::pin(async move { Ok(req.into_response(response).map_into_right_body()) });
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
    }
}

fn client_key(req: &ServiceRequest) -> String {
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
