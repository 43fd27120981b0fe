pub mod arbitration;
pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod duplicator;
pub mod errors;
pub mod handler;
pub mod metrics_defs;
pub mod role;
pub mod transcriber;

#[cfg(test)]
mod testutils;

use crate::errors::FailoverError;
use crate::handler::FailoverHandler;
use crate::transcriber::HandlerBody;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response};
use shared::admin_service::AdminService;
use shared::http::{run_http_service, serve};
use shared::metrics::Metrics;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;

/// Serves the failover router and its admin endpoints until either listener fails.
pub async fn run(config: config::Config, metrics: Metrics) -> Result<(), FailoverError> {
    config
        .validate()
        .map_err(|e| FailoverError::InvalidConfig(e.to_string()))?;

    let handler = FailoverHandler::from_config(&config, metrics)?;
    let listener =
        TcpListener::bind(format!("{}:{}", config.listener.host, config.listener.port)).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        primary = %config.upstreams.primary,
        secondary = %config.upstreams.secondary,
        "Failover router listening"
    );

    let ready = Arc::new(AtomicBool::new(false));
    let is_ready = ready.clone();
    let admin_service: AdminService<_, FailoverError> =
        AdminService::new(move || is_ready.load(Ordering::Relaxed));

    let router_task = async {
        serve(listener, FailoverService::new(handler)).await?;
        Ok::<_, FailoverError>(())
    };
    let admin_task = run_http_service::<_, _, FailoverError>(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    ready.store(true, Ordering::Relaxed);
    tokio::try_join!(router_task, admin_task)?;
    Ok(())
}

/// Catch-all hyper service: every method and path goes to the handler.
pub struct FailoverService {
    handler: Arc<FailoverHandler>,
}

impl FailoverService {
    pub fn new(handler: FailoverHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl Service<Request<Incoming>> for FailoverService {
    type Response = Response<HandlerBody>;
    type Error = FailoverError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let handler = self.handler.clone();
        Box::pin(async move { Ok(handler.handle(req).await) })
    }
}
