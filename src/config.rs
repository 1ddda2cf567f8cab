#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Clone)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum)]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "4040")]
    pub port: u16,

    // redis url for the remote cache tier
    #[clap(long, env)]
    pub redis_url: String,

    // base url of the upstream discovery api that resolves episode ids into
    // playable source descriptors
    #[clap(long, env)]
    pub provider_api_url: String,

    // this is needed to sign segment handles, have it be anything secure
    // like 'openssl rand -base64 32'
    #[clap(long, env)]
    pub signing_secret: String,

    // when set, playlists are rewritten with opaque signed handles instead of
    // the plain ?url= pass-through. pass-through leaks origin urls to clients,
    // handles don't, pick per deployment
    #[clap(long, env, default_value = "false")]
    pub signed_urls: bool,

    // this should be either * for allowing everything, or a comma seperated list
    // of origins like https://example.com,https://something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // referer to forward upstream when the client didn't carry one through
    #[clap(long, env)]
    pub default_referer: Option<String>,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl Default for AppConfig {
    // defaults aren't really needed here but it's here as a bad fallback
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 4040,
            redis_url: "redis://localhost:6379".to_string(),
            provider_api_url: "http://localhost:6969/api/v2".to_string(),
            signing_secret: "default-signing-secret".to_string(),
            signed_urls: false,
            cors_origin: "*".to_string(),
            default_referer: None,
            sentry_dsn: None,
        }
    }
}
