use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::config::RunParams;

/// Translate run parameters into `docker run --detach` arguments.
///
/// Returns the full argument list: flags, then `image`, then the command.
/// Keys the CLI has no flag for are rejected so a typo never changes what runs.
pub fn run_args(image: &str, params: &RunParams) -> Result<Vec<String>> {
    let mut flags: Vec<String> = vec!["run".into(), "--detach".into()];
    let mut entry_args: Vec<String> = Vec::new();
    let mut command: Vec<String> = Vec::new();

    for (key, value) in params {
        match key.as_str() {
            "name" => push_flag(&mut flags, "--name", scalar(key, value)?),
            "user" => push_flag(&mut flags, "--user", scalar(key, value)?),
            "working_dir" => push_flag(&mut flags, "--workdir", scalar(key, value)?),
            "hostname" => push_flag(&mut flags, "--hostname", scalar(key, value)?),
            "network_mode" => push_flag(&mut flags, "--network", scalar(key, value)?),
            "restart" => push_flag(&mut flags, "--restart", scalar(key, value)?),
            "privileged" => switch(&mut flags, "--privileged", key, value)?,
            "tty" => switch(&mut flags, "--tty", key, value)?,
            "stdin_open" => switch(&mut flags, "--interactive", key, value)?,
            // Always detached; accepted for compatibility with declared services.
            "detach" => {
                value
                    .as_bool()
                    .with_context(|| format!("run parameter `{key}` must be a boolean"))?;
            }
            "environment" => {
                for pair in pairs(key, value, "=")? {
                    push_flag(&mut flags, "--env", pair);
                }
            }
            "labels" => {
                for pair in pairs(key, value, "=")? {
                    push_flag(&mut flags, "--label", pair);
                }
            }
            "volumes" => {
                for volume in volumes(value)? {
                    push_flag(&mut flags, "--volume", volume);
                }
            }
            "ports" => {
                for port in ports(value)? {
                    push_flag(&mut flags, "--publish", port);
                }
            }
            "entrypoint" => {
                let mut words = words(key, value)?.into_iter();
                let program = words
                    .next()
                    .with_context(|| format!("run parameter `{key}` is empty"))?;
                push_flag(&mut flags, "--entrypoint", program);
                entry_args.extend(words);
            }
            "command" => command = words(key, value)?,
            other => bail!("unsupported run parameter `{other}`"),
        }
    }

    flags.push(image.to_string());
    flags.extend(entry_args);
    flags.extend(command);
    Ok(flags)
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: String) {
    args.push(flag.to_string());
    args.push(value);
}

fn switch(args: &mut Vec<String>, flag: &str, key: &str, value: &Value) -> Result<()> {
    let on = value
        .as_bool()
        .with_context(|| format!("run parameter `{key}` must be a boolean"))?;
    if on {
        args.push(flag.to_string());
    }
    Ok(())
}

fn scalar(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => bail!("run parameter `{key}` must be a string, number or boolean"),
    }
}

/// A command given as a list, or as a string split with shell quoting rules.
fn words(key: &str, value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(s) => shell_words::split(s)
            .with_context(|| format!("run parameter `{key}` has unbalanced quotes")),
        Value::Array(items) => items.iter().map(|item| scalar(key, item)).collect(),
        _ => bail!("run parameter `{key}` must be a string or a list"),
    }
}

/// `{K: V}` mappings or `["K=V"]` lists.
fn pairs(key: &str, value: &Value, sep: &str) -> Result<Vec<String>> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok(format!("{k}{sep}{}", scalar(key, v)?)))
            .collect(),
        Value::Array(items) => items.iter().map(|item| scalar(key, item)).collect(),
        _ => bail!("run parameter `{key}` must be a mapping or a list"),
    }
}

/// `{host: {bind, mode}}` mappings or `["host:container[:mode]"]` lists.
fn volumes(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(host, spec)| {
                let bind = spec
                    .get("bind")
                    .and_then(Value::as_str)
                    .with_context(|| format!("volume `{host}` has no `bind` path"))?;
                Ok(match spec.get("mode").and_then(Value::as_str) {
                    Some(mode) => format!("{host}:{bind}:{mode}"),
                    None => format!("{host}:{bind}"),
                })
            })
            .collect(),
        Value::Array(items) => items.iter().map(|item| scalar("volumes", item)).collect(),
        _ => bail!("run parameter `volumes` must be a mapping or a list"),
    }
}

/// `{"80/tcp": 8080}` mappings (container port to host port) or `["8080:80"]` lists.
fn ports(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(container, host)| match host {
                Value::Null => Ok(container.clone()),
                other => Ok(format!("{}:{container}", scalar("ports", other)?)),
            })
            .collect(),
        Value::Array(items) => items.iter().map(|item| scalar("ports", item)).collect(),
        _ => bail!("run parameter `ports` must be a mapping or a list"),
    }
}
