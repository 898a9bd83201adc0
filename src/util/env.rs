//! `.env`-backed configuration access.
//!
//! Values are read once into a static [`Env`] and handed out as `&'static str`
//! through the [`var!`] macro so call sites don't thread the struct around.

use std::sync::LazyLock;

use thiserror::Error;
use tokio::sync::OnceCell;

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);
pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    let vars = ENV_VARS.get_or_try_init(|| async { Env::new() }).await?;
    Ok(match var {
        Var::RedisUrl => &vars.redis_url,
        Var::ServerApiPort => &vars.server_api_port,
        Var::WhopApiKey => &vars.whop_api_key,
        Var::AnthropicApiKey => &vars.anthropic_api_key,
    })
}

#[derive(Debug, Clone)]
pub struct Env {
    pub redis_url: String,
    pub server_api_port: String,
    pub whop_api_key: String,
    pub anthropic_api_key: String,
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        // tolerate a missing .env file; the process environment may already
        // carry everything (container deployments)
        _ = dotenvy::dotenv();

        Ok(Self {
            redis_url: read("REDIS_URL")?,
            server_api_port: read("SERVER_API_PORT")?,
            whop_api_key: read("WHOP_API_KEY")?,
            anthropic_api_key: read("ANTHROPIC_API_KEY")?,
        })
    }
}

fn read(name: &'static str) -> EnvResult<String> {
    std::env::var(name).map_err(|_| EnvErr::MissingValue(name))
}

#[derive(Debug)]
pub enum Var {
    RedisUrl,
    ServerApiPort,
    WhopApiKey,
    AnthropicApiKey,
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error("missing environment variable '{0}'")]
    MissingValue(&'static str),

    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),
}
