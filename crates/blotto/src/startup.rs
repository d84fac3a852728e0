use crate::{
    api::{
        routes::{
            create_battle, get_battles, get_bets, get_events, get_heights, get_invoice,
            get_lightning_address, get_lottery, get_prizes, get_winners, join_battle,
            lnurl_withdraw, set_lightning_address, withdraw,
        },
        ErrorResponse,
    },
    config::Settings,
    domain::{
        battles::Battles, lottery::Lottery, stores::Stores, streamer::EventStreamer,
        tracker::PaymentTracker,
    },
    infra::{
        db::DBConnection,
        lightning::{Ln, LnClient},
        lnurl::LnurlClient,
        notifier::create_notifier,
    },
};
use anyhow::anyhow;
use axum::{
    extract::{
        connect_info::IntoMakeServiceWithConnectInfo, ConnectInfo, Request, State,
    },
    http::{HeaderValue, StatusCode},
    middleware::{self, AddExtension, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    serve::Serve,
    Json, Router,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use hyper::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use log::{error, info, warn};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::signal::unix::{signal, SignalKind};
use tokio::{net::TcpListener, select, sync::mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::cors::{AllowOrigin, CorsLayer};

const BATTLE_EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Application {
    server: Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    cancellation_token: CancellationToken,
    background_tasks: TaskTracker,
    shutdown_timeout: Duration,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let listener = SocketAddr::from_str(&config.server.address)?;
        let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
        let origins = config.api.origins.clone();

        let (app_state, background_tasks, cancellation_token) = build_app(config).await?;
        let server = build_server(listener, app_state, origins).await?;

        Ok(Self {
            server,
            cancellation_token,
            background_tasks,
            shutdown_timeout,
        })
    }

    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        info!("Starting server...");
        match self.server.with_graceful_shutdown(shutdown_signal()).await {
            Ok(_) => {
                info!("Server shutdown initiated");
                self.cancellation_token.cancel();

                let timeout = tokio::time::sleep(self.shutdown_timeout);
                select! {
                    _ = self.background_tasks.wait() => {
                        info!("Background tasks completed gracefully");
                    }
                    _ = timeout => {
                        warn!("Background tasks timed out during shutdown");
                    }
                }

                info!("Shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Server shutdown error: {}", e);
                self.cancellation_token.cancel();

                let _ = tokio::time::timeout(self.shutdown_timeout, self.background_tasks.wait())
                    .await;

                Err(anyhow!("Error during server shutdown: {}", e))
            }
        }
    }
}

pub struct AppState {
    pub stores: Stores,
    pub ln: Arc<dyn Ln>,
    pub tracker: Arc<PaymentTracker>,
    pub battles: Arc<Battles>,
    pub streamer: EventStreamer,
    pub sse_deadline: Duration,
    pub rate_limiter: DefaultKeyedRateLimiter<IpAddr>,
}

pub async fn build_app(
    config: Settings,
) -> Result<(Arc<AppState>, TaskTracker, CancellationToken), anyhow::Error> {
    std::fs::create_dir_all(&config.db.data_folder)
        .map_err(|e| anyhow!("creating data folder: {}", e))?;

    let db_connection = DBConnection::new(&config.db.data_folder, "raffle", &config.db)
        .await
        .map_err(|e| anyhow!("Error setting up raffle db: {}", e))?;
    let stores = Stores::new(db_connection);
    info!("Database configured");

    let ln: Arc<dyn Ln> = LnClient::new(&config.lightning).await.map(Arc::new)?;
    ln.ping().await?;
    info!("LND client configured");

    let notifier = create_notifier(&config.notifier)?;

    let tracker = Arc::new(PaymentTracker::default());
    let battles = Arc::new(Battles::new(stores.battles.clone(), ln.clone()));

    let (winners_tx, winners_rx) = mpsc::channel(16);
    let (blocks_tx, blocks_rx) = mpsc::channel(64);

    let background_tasks = TaskTracker::new();
    let cancel_token = CancellationToken::new();

    let streamer = EventStreamer::new(
        ln.clone(),
        stores.clone(),
        tracker.clone(),
        battles.clone(),
        blocks_tx,
        cancel_token.clone(),
    );
    streamer.spawn(&background_tasks, winners_rx).await?;
    info!("Event streamer configured");

    let lottery = Lottery::new(
        config.lottery.duration,
        config.lightning.max_fee_ppm,
        stores.clone(),
        ln.clone(),
        notifier,
        LnurlClient::new(),
        winners_tx,
        cancel_token.clone(),
    );
    background_tasks.spawn(async move {
        match lottery.run(blocks_rx).await {
            Ok(_) => info!("Successfully shutdown lottery coordinator"),
            Err(e) => error!("Error in lottery coordinator: {}", e),
        }
    });
    info!("Lottery coordinator configured");

    let expiry_battles = battles.clone();
    let expiry_cancel = cancel_token.clone();
    background_tasks.spawn(async move {
        let mut interval = tokio::time::interval(BATTLE_EXPIRY_SWEEP_INTERVAL);
        loop {
            select! {
                _ = interval.tick() => {
                    if let Err(e) = expiry_battles.expire().await {
                        error!("Error expiring battles: {}", e);
                    }
                }
                _ = expiry_cancel.cancelled() => {
                    info!("Battle expiry watcher received cancellation");
                    return;
                }
            }
        }
    });

    background_tasks.close();

    let quota = Quota::with_period(Duration::from_secs(config.api.rate_limiter.interval_secs))
        .ok_or_else(|| anyhow!("invalid rate limiter interval"))?
        .allow_burst(
            NonZeroU32::new(config.api.rate_limiter.tokens)
                .ok_or_else(|| anyhow!("invalid rate limiter tokens"))?,
        );

    let app_state = Arc::new(AppState {
        stores,
        ln,
        tracker,
        battles,
        streamer,
        sse_deadline: Duration::from_secs(config.api.sse.deadline_secs),
        rate_limiter: RateLimiter::keyed(quota),
    });

    Ok((app_state, background_tasks, cancel_token))
}

pub async fn build_server(
    socket_addr: SocketAddr,
    app_state: Arc<AppState>,
    origins: Vec<String>,
) -> Result<
    Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    anyhow::Error,
> {
    let listener = TcpListener::bind(socket_addr).await?;

    info!("Setting up service");
    let app = app(app_state, origins);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    info!(
        "Service running @: http://{}:{}",
        socket_addr.ip(),
        socket_addr.port()
    );

    Ok(server)
}

pub fn app(app_state: Arc<AppState>, origins: Vec<String>) -> Router {
    let origins: Vec<HeaderValue> = origins
        .into_iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION])
        .allow_origin(AllowOrigin::list(origins));

    Router::new()
        .route("/api/lottery", get(get_lottery))
        .route("/api/heights", get(get_heights))
        .route("/api/bets", get(get_bets))
        .route("/api/winners", get(get_winners))
        .route("/api/prizes", get(get_prizes))
        .route("/api/invoice", get(get_invoice))
        .route("/api/withdraw", post(withdraw))
        .route("/api/lightning/lnurlw", get(lnurl_withdraw))
        .route(
            "/api/lightning/address",
            get(get_lightning_address).post(set_lightning_address),
        )
        .route("/api/events", get(get_events))
        .route("/api/battles", get(get_battles).post(create_battle))
        .route("/api/battles/{battle_id}/join", post(join_battle))
        .layer(middleware::from_fn(log_request))
        .layer(middleware::from_fn_with_state(app_state.clone(), rate_limit))
        .with_state(app_state)
        .layer(cors)
}

async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if state.rate_limiter.check_key(&addr.ip()).is_err() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: String::from("too many requests"),
            }),
        )
            .into_response();
    }

    next.run(request).await
}

async fn log_request(request: Request, next: Next) -> impl IntoResponse {
    let now = time::OffsetDateTime::now_utc();
    let method = request.method().as_str().to_owned();
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_default();
    info!(target: "http_request", "new request, {} {}", method, path);

    let response = next.run(request).await;
    let response_time = time::OffsetDateTime::now_utc() - now;
    info!(target: "http_response", "response, code: {}, time: {}", response.status().as_str(), response_time);

    response
}

async fn shutdown_signal() {
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

    select! {
        _ = sigint.recv() => info!("Received SIGINT signal"),
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
    }
}
