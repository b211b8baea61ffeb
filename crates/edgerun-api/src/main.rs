use edgerun_core::Config;

// mimalloc lowers allocator fragmentation under the small, frequent
// allocations the sandbox executor's subprocess-per-invocation model makes.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env()?;
    let (router, scheduler) = edgerun_api::setup::initialize_app(&config).await?;
    edgerun_api::setup::server::start_server(&config, router, scheduler).await?;

    Ok(())
}
