pub(crate) mod schema;

pub(crate) use schema::Config;

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Load configuration, layering (lowest to highest priority):
/// 1. Built-in defaults
/// 2. `$COZE_RELAY_CONFIG` or `~/.coze-relay/config.yaml`
/// 3. Environment overrides (`PORT`, `COZE_PAT`, ...)
pub(crate) fn load_config() -> Result<Config> {
    let path = resolve_config_path();

    let mut config = match path {
        Some(p) if p.exists() => {
            tracing::info!(path = %p.display(), "loading config");
            let raw = std::fs::read_to_string(&p)
                .with_context(|| format!("reading config from {}", p.display()))?;
            serde_yaml::from_str(&raw)
                .with_context(|| format!("parsing config from {}", p.display()))?
        }
        _ => {
            tracing::debug!("no config file found, using defaults");
            Config::default()
        }
    };

    resolve_env_vars(&mut config);
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Determine the config file path.
fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("COZE_RELAY_CONFIG") {
        let p = PathBuf::from(path);
        if !p.as_os_str().is_empty() {
            return Some(p);
        }
    }

    dirs::home_dir().map(|h| h.join(".coze-relay").join("config.yaml"))
}

/// Resolve `${ENV_VAR}` references in the secret fields.
fn resolve_env_vars(config: &mut Config) {
    for field in [
        &mut config.coze.pat,
        &mut config.coze.bot_id,
        &mut config.fchat.token,
        &mut config.fpt.webhook_secret,
    ] {
        if let Some(value) = field.take() {
            *field = Some(substitute_env_vars(&value));
        }
    }
}

/// Apply the flat environment variables a hosting platform typically sets.
/// Empty values are ignored.
fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(port) = get("PORT") {
        config.port = port
            .trim()
            .parse()
            .with_context(|| format!("invalid PORT value '{}'", port))?;
    }
    if let Some(v) = get("COZE_BASE_URL") {
        config.coze.base_url = v;
    }
    if let Some(v) = get("COZE_PAT") {
        config.coze.pat = Some(v);
    }
    if let Some(v) = get("COZE_BOT_ID") {
        config.coze.bot_id = Some(v);
    }
    if let Some(v) = get("FCHAT_BASE_URL") {
        config.fchat.base_url = v;
    }
    if let Some(v) = get("FCHAT_TOKEN") {
        config.fchat.token = Some(v);
    }
    if let Some(v) = get("FPT_WEBHOOK_SECRET") {
        config.fpt.webhook_secret = Some(v);
    }
    Ok(())
}

/// Substitute `${VAR}` patterns with environment variable values.
/// Returns the original string unchanged if the variable is not set.
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    if let Some(inner) = extract_env_ref(&result) {
        if let Ok(val) = std::env::var(inner) {
            return val;
        }
    }
    // Inline ${VAR} substitution within a larger string
    while let Some(start) = result.find("${") {
        let rest = &result[start + 2..];
        if let Some(end) = rest.find('}') {
            let var_name = &rest[..end];
            let replacement = std::env::var(var_name).unwrap_or_default();
            result = format!("{}{}{}", &result[..start], replacement, &rest[end + 1..]);
        } else {
            break;
        }
    }
    result
}

/// If the entire string is `${VAR}`, return the variable name.
fn extract_env_ref(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.starts_with("${") && trimmed.ends_with('}') && trimmed.len() > 3 {
        let inner = &trimmed[2..trimmed.len() - 1];
        if !inner.contains('{') && !inner.contains('}') {
            return Some(inner);
        }
    }
    None
}
