use serde::{Deserialize, Serialize};

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Config {
    /// Address the webhook server binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the webhook server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long a user's Coze conversation id is remembered.
    #[serde(default = "default_conversation_ttl_secs")]
    pub conversation_ttl_secs: u64,

    /// Coze chat API settings.
    #[serde(default)]
    pub coze: CozeConfig,

    /// FChat reply delivery settings.
    #[serde(default)]
    pub fchat: FChatConfig,

    /// FPT bot webhook settings.
    #[serde(default)]
    pub fpt: FptConfig,
}

/// Coze chat API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CozeConfig {
    #[serde(default = "default_coze_base_url")]
    pub base_url: String,

    /// Personal access token, supports `${ENV_VAR}` syntax.
    #[serde(default)]
    pub pat: Option<String>,

    /// Bot to chat with, supports `${ENV_VAR}` syntax.
    #[serde(default)]
    pub bot_id: Option<String>,

    /// Bound on the whole chat call, streamed body included.
    #[serde(default = "default_coze_timeout_secs")]
    pub timeout_secs: u64,
}

/// FChat reply delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FChatConfig {
    #[serde(default = "default_fchat_base_url")]
    pub base_url: String,

    /// Token embedded in the reply URL, supports `${ENV_VAR}` syntax.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_fchat_timeout_secs")]
    pub timeout_secs: u64,
}

/// FPT bot webhook settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct FptConfig {
    /// Expected `X-Webhook-Secret` header value.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            conversation_ttl_secs: default_conversation_ttl_secs(),
            coze: CozeConfig::default(),
            fchat: FChatConfig::default(),
            fpt: FptConfig::default(),
        }
    }
}

impl Default for CozeConfig {
    fn default() -> Self {
        Self {
            base_url: default_coze_base_url(),
            pat: None,
            bot_id: None,
            timeout_secs: default_coze_timeout_secs(),
        }
    }
}

impl Default for FChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_fchat_base_url(),
            token: None,
            timeout_secs: default_fchat_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_conversation_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_coze_base_url() -> String {
    "https://api.coze.com".to_string()
}

fn default_coze_timeout_secs() -> u64 {
    25
}

fn default_fchat_base_url() -> String {
    "https://alerts.soc.fpt.net/webhooks".to_string()
}

fn default_fchat_timeout_secs() -> u64 {
    15
}

impl Config {
    /// Validate configuration values, returning an error with a helpful message
    /// if any value is out of range. Missing credentials are allowed here; the
    /// request paths report them.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }
        if self.conversation_ttl_secs == 0 {
            anyhow::bail!("conversation_ttl_secs must be greater than 0");
        }
        if self.coze.timeout_secs == 0 {
            anyhow::bail!("coze.timeout_secs must be greater than 0");
        }
        if self.fchat.timeout_secs == 0 {
            anyhow::bail!("fchat.timeout_secs must be greater than 0");
        }
        for (name, url) in [
            ("coze.base_url", &self.coze.base_url),
            ("fchat.base_url", &self.fchat.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{name} must start with http:// or https://, got '{url}'");
            }
        }
        Ok(())
    }
}
