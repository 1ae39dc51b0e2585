use clap::Parser;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use overload_common::Config;
use overload_harness::cli::{Cli, Role};
use overload_harness::engine::Driver;
use overload_harness::logging::init_logging;
use overload_harness::transport::rumqtt::RumqttConnector;
use overload_harness::transport::ClientOptions;
use overload_harness::{
    CloseOptions, Coordinator, Metrics, PayloadCodec, Pool, PublisherDriver, SubscriberDriver,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

async fn metrics_handler(
    req: Request<Body>,
    metrics: Arc<Metrics>,
) -> Result<Response<Body>, Infallible> {
    match req.uri().path() {
        "/health" => Ok(Response::new(Body::from("OK"))),
        "/metrics" => Ok(Response::new(Body::from(metrics.render()))),
        _ => {
            let mut not_found = Response::new(Body::from("Not Found"));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Ok(not_found)
        }
    }
}

async fn run_metrics_server(port: u16, metrics: Arc<Metrics>, shutdown: CancellationToken) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let make_svc = make_service_fn(move |_conn| {
        let metrics = Arc::clone(&metrics);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                metrics_handler(req, Arc::clone(&metrics))
            }))
        }
    });

    let server = Server::bind(&addr)
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });

    info!(port = port, "Metrics endpoint online");

    if let Err(e) = server.await {
        error!(error = %e, "Metrics endpoint failed");
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                error!(error = %e, "Unable to listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn run_role<D: Driver<RumqttConnector>>(
    options: Vec<ClientOptions>,
    driver: Arc<D>,
    close_options: CloseOptions,
    metrics: Arc<Metrics>,
    shutdown: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = Pool::new(Arc::new(RumqttConnector), options);
    let coordinator = Coordinator::new(pool, driver, close_options, metrics);
    coordinator.run(shutdown).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    init_logging(&config.logging);

    info!(
        config = %cli.config.display(),
        role = ?cli.role,
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        "Overload harness starting"
    );

    let shutdown = CancellationToken::new();
    let metrics = Arc::new(Metrics::new()?);
    let codec = Arc::new(PayloadCodec::new());
    let close_options = CloseOptions {
        timeout: Duration::from_secs(config.shutdown.close_timeout_secs),
    };

    if config.metrics.enabled {
        let port = config.metrics.port;
        let metrics = Arc::clone(&metrics);
        let token = shutdown.clone();
        tokio::spawn(async move {
            run_metrics_server(port, metrics, token).await;
        });
    }

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    let result = match cli.role {
        Role::Publish => {
            let driver = Arc::new(PublisherDriver::new(
                &config.publisher,
                codec,
                Arc::clone(&metrics),
            ));
            run_role(
                PublisherDriver::client_options(&config),
                driver,
                close_options,
                metrics,
                &shutdown,
            )
            .await
        }
        Role::Subscribe => {
            let driver = Arc::new(SubscriberDriver::new(
                &config.subscriber,
                codec,
                Arc::clone(&metrics),
            ));
            run_role(
                SubscriberDriver::client_options(&config),
                driver,
                close_options,
                metrics,
                &shutdown,
            )
            .await
        }
    };

    shutdown.cancel();
    if let Err(e) = &result {
        error!(error = %e, "Overload harness stopped with an error");
    } else {
        info!("Overload harness stopped");
    }
    result
}
