#![forbid(unsafe_code)]

//! Runtime configuration. Every value can come from a CLI override, the
//! process environment, or a `.env` file, in that order of precedence.

use anyhow::{Context, Result, bail};
use std::{
    collections::HashMap,
    env, fmt, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_YTDLP_COMMAND: &str = "yt-dlp";
pub const DEFAULT_COBALT_API_URL: &str = "https://api.cobalt.tools/";
pub const DEFAULT_WHOP_API_BASE: &str = "https://api.whop.com/api/v5";
pub const DEFAULT_WHOP_TOKEN_ISSUER: &str = "urn:whopcom:exp-proxy";

/// Which retrieval strategy the process serves with. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    YtDlp,
    Cobalt,
}

impl BackendKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ytdlp" | "yt-dlp" | "local" => Ok(Self::YtDlp),
            "cobalt" | "proxy" => Ok(Self::Cobalt),
            other => bail!("unknown backend `{other}`; expected `ytdlp` or `cobalt`"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::YtDlp => "ytdlp",
            Self::Cobalt => "cobalt",
        }
    }
}

/// Credentials for the identity provider.
#[derive(Clone)]
pub struct IdentitySettings {
    pub app_id: Option<String>,
    /// Only needed for experience access checks.
    pub api_key: Option<String>,
    pub api_base: String,
    /// PEM text, or a path to a PEM file, of the key user tokens are signed with.
    pub token_public_key: Option<String>,
    pub token_issuer: String,
}

impl fmt::Debug for IdentitySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentitySettings")
            .field("app_id", &self.app_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("token_public_key", &self.token_public_key.is_some())
            .field("token_issuer", &self.token_issuer)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    /// Program followed by its leading arguments, e.g. `python3 -m yt_dlp`.
    pub ytdlp_command: Vec<String>,
    pub temp_dir: PathBuf,
    pub cobalt_api_url: String,
    pub identity: IdentitySettings,
    pub www_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub backend: Option<BackendKind>,
    pub www_root: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config(&file_vars, env_var_string, overrides)
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("WHOPTUBE_HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("WHOPTUBE_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);
    let backend = match overrides.backend {
        Some(backend) => backend,
        None => match lookup("WHOPTUBE_BACKEND") {
            Some(value) => BackendKind::parse(&value).context("reading WHOPTUBE_BACKEND")?,
            None => BackendKind::Cobalt,
        },
    };

    let ytdlp_command = lookup("YTDLP_COMMAND")
        .map(|value| {
            value
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|parts| !parts.is_empty())
        .unwrap_or_else(|| vec![DEFAULT_YTDLP_COMMAND.to_string()]);
    let temp_dir = lookup("WHOPTUBE_TEMP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir);
    let cobalt_api_url =
        lookup("COBALT_API_URL").unwrap_or_else(|| DEFAULT_COBALT_API_URL.to_string());

    let identity = IdentitySettings {
        app_id: lookup("WHOP_APP_ID"),
        api_key: lookup("WHOP_API_KEY"),
        api_base: lookup("WHOP_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_WHOP_API_BASE.to_string()),
        token_public_key: lookup("WHOP_TOKEN_PUBLIC_KEY"),
        token_issuer: lookup("WHOP_TOKEN_ISSUER")
            .unwrap_or_else(|| DEFAULT_WHOP_TOKEN_ISSUER.to_string()),
    };

    let www_root = overrides
        .www_root
        .or_else(|| lookup("WWW_ROOT").map(PathBuf::from));

    Ok(RuntimeConfig {
        host,
        port,
        backend,
        ytdlp_command,
        temp_dir,
        cobalt_api_url,
        identity,
        www_root,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

/// Parses a dotenv-style file. A missing file is not an error.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = unquote(value_raw.trim());
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .or_else(|| {
            value
                .strip_prefix('\'')
                .and_then(|value| value.strip_suffix('\''))
        })
        .unwrap_or(value)
}
