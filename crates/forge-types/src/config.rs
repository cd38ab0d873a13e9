//! Configuration types for Adventure Forge.
//!
//! `ForgeConfig` represents the top-level `config.toml`. Every field has a
//! default so an absent or partial file still yields a usable config.

use serde::{Deserialize, Serialize};

/// Process-wide default system instructions for generation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are \"Adventure Forge AI\", a creative partner for \
Tabletop Roleplaying Game GMs. Generate imaginative, detailed, and useful TTRPG content \
(locations, NPCs, items, monsters, plot hooks, etc.). Be descriptive, provide actionable \
details, maintain a helpful tone, and use Markdown formatting.";

/// Top-level configuration, loaded from `~/.forge/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL. When unset the data directory default is used.
    #[serde(default)]
    pub url: Option<String>,
}

/// Which backend serves generation requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    /// Replays canned text; needs no credentials. For local runs.
    Scripted,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gemini" => Ok(ProviderKind::Gemini),
            "scripted" => Ok(ProviderKind::Scripted),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the provider API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Upper bound on one whole generation stream.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f64>,
}

fn default_model() -> String {
    "gemini-1.5-flash-latest".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_output_tokens() -> u32 {
    2048
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Prior messages sent to the provider with each turn.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    /// Characters of the prompt kept when titling a new conversation.
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,
}

fn default_history_limit() -> u32 {
    20
}

fn default_title_max_chars() -> usize {
    50
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            title_max_chars: default_title_max_chars(),
            default_system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    #[serde(default = "default_credits_per_purchase")]
    pub credits_per_purchase: i64,
    #[serde(default = "default_webhook_secret_env")]
    pub webhook_secret_env: String,
    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: i64,
}

fn default_credits_per_purchase() -> i64 {
    100
}

fn default_webhook_secret_env() -> String {
    "STRIPE_WEBHOOK_SECRET".to_string()
}

fn default_signature_tolerance_secs() -> i64 {
    300
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            credits_per_purchase: default_credits_per_purchase(),
            webhook_secret_env: default_webhook_secret_env(),
            signature_tolerance_secs: default_signature_tolerance_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Header carrying the stable user id set by the auth proxy.
    #[serde(default = "default_user_header")]
    pub user_header: String,
    #[serde(default = "default_email_header")]
    pub email_header: String,
    #[serde(default = "default_proxy_secret_header")]
    pub proxy_secret_header: String,
    /// When set, requests must carry this env var's value in `proxy_secret_header`.
    #[serde(default)]
    pub proxy_secret_env: Option<String>,
}

fn default_user_header() -> String {
    "x-forge-user-id".to_string()
}

fn default_email_header() -> String {
    "x-forge-user-email".to_string()
}

fn default_proxy_secret_header() -> String {
    "x-forge-proxy-secret".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_header: default_user_header(),
            email_header: default_email_header(),
            proxy_secret_header: default_proxy_secret_header(),
            proxy_secret_env: None,
        }
    }
}
