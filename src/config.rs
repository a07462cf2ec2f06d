use serde::Deserialize;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// PostgreSQL database connection URL. The in-memory store is used when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Redis connection URL. Caching is disabled when unset.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Default number of records per listing page
    #[serde(default = "default_page_size")]
    pub page_size: i64,

    /// Largest page size a client may request
    #[serde(default = "default_page_size_max")]
    pub page_size_max: i64,

    /// bcrypt work factor for password hashes
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,

    /// Lifetime of sessions, activation and reset tokens
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,

    /// Public base URL used when building links sent by email
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// HTTP mail relay endpoint. Outgoing mail is logged when unset.
    #[serde(default)]
    pub mail_relay_url: Option<String>,

    /// TTL of cached catalog data, in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_page_size() -> i64 {
    10
}

fn default_page_size_max() -> i64 {
    100
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            host: default_host(),
            port: default_port(),
            page_size: default_page_size(),
            page_size_max: default_page_size_max(),
            bcrypt_cost: default_bcrypt_cost(),
            token_ttl_hours: default_token_ttl_hours(),
            public_url: default_public_url(),
            mail_relay_url: None,
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.page_size < 1 || self.page_size > self.page_size_max {
            anyhow::bail!(
                "PAGE_SIZE must be between 1 and PAGE_SIZE_MAX ({}), got {}",
                self.page_size_max,
                self.page_size
            );
        }
        Ok(())
    }
}
