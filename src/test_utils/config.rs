//! Environment helpers for configuration tests.
//!
//! Callers must be `#[serial]`: the process environment is shared.

/// Runs `f` with the given variables set, restoring the previous values after.
pub fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let originals: Vec<(String, Option<String>)> = vars
        .iter()
        .map(|(key, _)| (key.to_string(), std::env::var(key).ok()))
        .collect();
    for (key, value) in vars {
        std::env::set_var(key, value);
    }

    let result = f();

    restore(originals);
    result
}

/// Runs `f` with the given variables unset, restoring the previous values after.
pub fn without_env_vars<F, R>(keys: &[&str], f: F) -> R
where
    F: FnOnce() -> R,
{
    let originals: Vec<(String, Option<String>)> = keys
        .iter()
        .map(|key| (key.to_string(), std::env::var(key).ok()))
        .collect();
    for key in keys {
        std::env::remove_var(key);
    }

    let result = f();

    restore(originals);
    result
}

fn restore(originals: Vec<(String, Option<String>)>) {
    for (key, original) in originals {
        match original {
            Some(value) => std::env::set_var(&key, value),
            None => std::env::remove_var(&key),
        }
    }
}
