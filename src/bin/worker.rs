use metrics_exporter_prometheus::PrometheusBuilder;
use podcast_video_pipeline::{
    config::AppConfig,
    db::{
        self,
        store::{PgStore, PipelineStore, RenderTaskStore},
    },
    pipeline::{
        assembler::FfmpegAssembler,
        paths::OutputLayout,
        render::RenderAdapter,
        scanner::{ScanSettings, Scanner},
        segments::SegmentGenerator,
    },
    routes,
    services::{ffmpeg::Ffmpeg, heygen::HeygenClient, lock::SweepLock},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting podcast video worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        routes::metrics::describe_metrics();
        tracing::info!(%addr, "Serving worker metrics");
    }

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let pg = Arc::new(PgStore::new(db_pool));
    let store: Arc<dyn PipelineStore> = pg.clone();
    let task_store: Arc<dyn RenderTaskStore> = pg.clone();

    let ffmpeg = Arc::new(Ffmpeg::new(&config.ffmpeg_bin, &config.ffprobe_bin));
    let layout = OutputLayout::new(&config.output_root);

    let render = match &config.heygen_api_key {
        Some(key) => {
            let client = HeygenClient::new(&config.heygen_base_url, key);
            Some(Arc::new(RenderAdapter::new(
                Arc::new(client),
                task_store,
                config.render_poll_interval(),
                config.render_timeout(),
            )))
        }
        None => {
            tracing::info!("HEYGEN_API_KEY not set, avatar rendering disabled");
            None
        }
    };

    let stage = SegmentGenerator::new(pg.clone(), ffmpeg.clone(), render.clone(), layout.clone());
    let assembler = FfmpegAssembler::new(ffmpeg, layout.clone());

    let settings = ScanSettings {
        max_retries: config.max_retries,
        batch_size: config.sweep_batch_size,
        lease: config.lease(),
    };
    let mut scanner = Scanner::new(store, Arc::new(stage), Arc::new(assembler), layout, settings);
    if let Some(render) = render {
        scanner = scanner.with_render(render);
    }
    if let Some(url) = &config.redis_url {
        let lock = SweepLock::new(url, config.lease()).expect("Failed to initialize Redis client");
        scanner = scanner.with_lock(Arc::new(lock));
    }

    tracing::info!(
        owner = %scanner.owner(),
        max_retries = config.max_retries,
        interval_secs = config.sweep_interval_secs,
        run_once = config.run_once,
        "Worker ready"
    );

    loop {
        match scanner.run_sweep().await {
            Ok(Some(report)) => tracing::debug!(?report, "Sweep report"),
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "Sweep failed, will retry next cycle"),
        }

        if config.run_once {
            break;
        }
        sleep(config.sweep_interval()).await;
    }

    tracing::info!("Worker stopped");
}
