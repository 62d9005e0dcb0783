use actix_identity::IdentityMiddleware;
use actix_session::storage::CookieSessionStore;
use actix_session::SessionMiddleware;
use actix_web::cookie::Key;
use actix_web::{web, App, HttpServer};
use listenfd::ListenFd;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use kodbatalo::cache::Cache;
use kodbatalo::grading::GradingPipeline;
use kodbatalo::rate_limit::RateLimiter;
use kodbatalo::routes::{self, AppState};
use kodbatalo::sandbox::HttpSandbox;
use kodbatalo::scoring::SubmissionLocks;
use kodbatalo::setup;

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    setup::setup_dotenv();
    env_logger::init();

    let config = setup::Config::from_env();
    let pool = setup::establish_pool(&config.database_url).expect("couldn't build database pool");
    {
        let mut connection = pool.get().expect("couldn't get a setup connection");
        setup::run_migrations(&mut connection).expect("couldn't apply schema");
        setup::setup_host_account(&mut connection);
    }

    let sandbox = Arc::new(HttpSandbox::new(config.sandbox_url.clone()));
    info!("Grading against sandbox at {}", config.sandbox_url);

    let state = web::Data::new(AppState {
        pool: pool.clone(),
        grader: GradingPipeline::new(sandbox, config.sandbox_timeout),
        locks: SubmissionLocks::new(),
        leaderboard_cache: Arc::new(Cache::new()),
        challenge_board_cache: Arc::new(Cache::new()),
        participant_cache: Arc::new(Cache::new()),
        api_limiter: RateLimiter::new(100, Duration::from_secs(60)),
        auth_limiter: RateLimiter::new(5, Duration::from_secs(15 * 60)),
        submission_limiter: RateLimiter::new(10, Duration::from_secs(60)),
    });

    state
        .leaderboard_cache
        .clone()
        .start_sweep_task(CACHE_SWEEP_INTERVAL);
    state
        .challenge_board_cache
        .clone()
        .start_sweep_task(CACHE_SWEEP_INTERVAL);
    state
        .participant_cache
        .clone()
        .start_sweep_task(CACHE_SWEEP_INTERVAL);
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                state.api_limiter.sweep();
                state.auth_limiter.sweep();
                state.submission_limiter.sweep();
            }
        });
    }

    let session_key = match config.session_secret.as_deref() {
        Some(secret) if secret.len() >= 64 => Key::derive_from(secret.as_bytes()),
        Some(_) => {
            warn!("SESSION_SECRET is shorter than 64 bytes; using an ephemeral key");
            Key::generate()
        }
        None => {
            warn!("SESSION_SECRET not set; sessions won't survive a restart");
            Key::generate()
        }
    };

    let app_state = state.clone();
    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(IdentityMiddleware::default())
            .wrap(SessionMiddleware::new(
                CookieSessionStore::default(),
                session_key.clone(),
            ))
            .configure(routes::config)
    });

    let mut listenfd = ListenFd::from_env();
    server = match listenfd.take_tcp_listener(0)? {
        Some(listener) => server.listen(listener)?,
        None => server.bind(&config.bind_address)?,
    };

    info!("kodbatalo listening on {}", config.bind_address);
    server.run().await
}
