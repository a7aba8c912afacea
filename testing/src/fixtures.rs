use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, Ordering};
use testcontainers::{ContainerAsync, Image, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

const PG_DB: &str = "tag_mirror";
const PG_USER: &str = "mirror";
const PG_PASSWORD: &str = "mirror";

static NEXT_SUFFIX: AtomicU32 = AtomicU32::new(0);

/// `prefix`, the process id and a per-process counter.
pub fn unique_id(prefix: &str) -> String {
    let n = NEXT_SUFFIX.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}-{}", prefix, std::process::id(), n)
}

/// A namespace no other test in this process uses.
pub fn unique_app_id() -> String {
    unique_id("wx-test")
}

/// A running container plus the URL clients connect with. The container
/// is stopped when the fixture is dropped, i.e. at process exit.
pub struct Fixture<I: Image> {
    _container: ContainerAsync<I>,
    url: String
}

pub type PostgresFixture = Fixture<Postgres>;
pub type RedisFixture = Fixture<Redis>;

impl<I: Image> Fixture<I> {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Fixture<Postgres> {
    pub async fn pool(&self) -> Option<PgPool> {
        PgPoolOptions::new()
            .max_connections(5)
            .connect(&self.url)
            .await
            .map_err(|e| unavailable("postgres pool", e))
            .ok()
    }
}

impl Fixture<Redis> {
    /// Reads a raw key, for asserting on cache contents.
    pub async fn get(&self, key: &str) -> Option<String> {
        let client = redis::Client::open(self.url.as_str()).ok()?;
        let mut conn = client.get_multiplexed_async_connection().await.ok()?;
        redis::cmd("GET").arg(key).query_async(&mut conn).await.ok()?
    }
}

fn unavailable(what: &str, e: impl Debug) {
    tracing::warn!(
        fixture = what,
        error = ?e,
        "Test fixture unavailable, dependent tests will skip"
    );
}

async fn host_port<I: Image>(
    container: &ContainerAsync<I>,
    what: &str,
    port: u16
) -> Option<u16> {
    let mapped = container
        .get_host_port_ipv4(port)
        .await
        .map_err(|e| unavailable(what, e))
        .ok()?;
    tracing::info!(fixture = what, host_port = mapped, "Test container ready");
    Some(mapped)
}

static POSTGRES: OnceCell<Option<PostgresFixture>> = OnceCell::const_new();

pub async fn postgres() -> Option<&'static PostgresFixture> {
    POSTGRES
        .get_or_init(|| async {
            let container = Postgres::default()
                .with_db_name(PG_DB)
                .with_user(PG_USER)
                .with_password(PG_PASSWORD)
                .with_tag("16-alpine")
                .start()
                .await
                .map_err(|e| unavailable("postgres", e))
                .ok()?;
            let port = host_port(&container, "postgres", 5432).await?;

            Some(Fixture {
                url: format!(
                    "postgres://{}:{}@localhost:{}/{}",
                    PG_USER, PG_PASSWORD, port, PG_DB
                ),
                _container: container
            })
        })
        .await
        .as_ref()
}

static REDIS: OnceCell<Option<RedisFixture>> = OnceCell::const_new();

pub async fn redis() -> Option<&'static RedisFixture> {
    REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .map_err(|e| unavailable("redis", e))
                .ok()?;
            let port = host_port(&container, "redis", 6379).await?;
            let url = format!("redis://localhost:{}", port);

            // The mapped port can accept connections before the server does.
            ping(&url)
                .await
                .map_err(|e| unavailable("redis ping", e))
                .ok()?;

            Some(Fixture {
                _container: container,
                url
            })
        })
        .await
        .as_ref()
}

async fn ping(url: &str) -> Result<(), redis::RedisError> {
    let client = redis::Client::open(url)?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
}
