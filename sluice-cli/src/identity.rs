//! Actor identity resolution.

use crate::config::Config;

/// Overrides `[identity] actor`.
pub const ACTOR_ENV: &str = "SLUICE_ACTOR";

/// Resolve the actor: flag, `SLUICE_ACTOR`, config, then `user@host`.
pub fn resolve(flag: Option<&str>, config: &Config) -> String {
    resolve_with(flag, config, |key| std::env::var(key).ok())
}

fn resolve_with(
    flag: Option<&str>,
    config: &Config,
    env: impl Fn(&str) -> Option<String>,
) -> String {
    let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

    if let Some(actor) = non_empty(flag.map(str::to_string)) {
        return actor;
    }
    if let Some(actor) = non_empty(env(ACTOR_ENV)) {
        return actor;
    }
    if let Some(actor) = non_empty(config.identity.actor.clone()) {
        return actor;
    }

    let user = non_empty(env("USER"))
        .or_else(|| non_empty(env("USERNAME")))
        .unwrap_or_else(|| "unknown".to_string());
    let host = non_empty(env("HOSTNAME"))
        .or_else(|| non_empty(env("COMPUTERNAME")))
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}@{}", user, host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_precedence() {
        let mut config = Config::default();
        config.identity.actor = Some("from-config".into());
        let vars = env(&[("SLUICE_ACTOR", "from-env"), ("USER", "ann"), ("HOSTNAME", "box")]);

        assert_eq!(resolve_with(Some("from-flag"), &config, &vars), "from-flag");
        assert_eq!(resolve_with(None, &config, &vars), "from-env");

        let vars = env(&[("USER", "ann"), ("HOSTNAME", "box")]);
        assert_eq!(resolve_with(None, &config, &vars), "from-config");
    }

    #[test]
    fn test_user_at_host_fallback() {
        let config = Config::default();
        assert_eq!(
            resolve_with(None, &config, env(&[("USER", "ann"), ("HOSTNAME", "box")])),
            "ann@box"
        );
        assert_eq!(
            resolve_with(None, &config, env(&[("USERNAME", "bo")])),
            "bo@localhost"
        );
        assert_eq!(resolve_with(Some("  "), &config, env(&[])), "unknown@localhost");
    }
}
