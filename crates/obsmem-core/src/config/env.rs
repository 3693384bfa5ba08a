/// Environment lookup; `std::env::var` in production, a map in tests.
pub(super) trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

pub(super) struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl<F> EnvSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn var(&self, name: &str) -> Option<String> {
        self(name)
    }
}

#[must_use]
pub(super) fn read_non_empty_env(env: &dyn EnvSource, name: &str) -> Option<String> {
    env.var(name)
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[must_use]
pub(super) fn read_env_usize(env: &dyn EnvSource, name: &str) -> Option<usize> {
    read_non_empty_env(env, name).and_then(|raw| raw.parse::<usize>().ok())
}

#[must_use]
pub(super) fn read_env_u16(env: &dyn EnvSource, name: &str) -> Option<u16> {
    read_non_empty_env(env, name).and_then(|raw| raw.parse::<u16>().ok())
}

#[must_use]
pub(super) fn read_env_u32(env: &dyn EnvSource, name: &str) -> Option<u32> {
    read_non_empty_env(env, name).and_then(|raw| raw.parse::<u32>().ok())
}

#[must_use]
pub(super) fn read_env_u64(env: &dyn EnvSource, name: &str) -> Option<u64> {
    read_non_empty_env(env, name).and_then(|raw| raw.parse::<u64>().ok())
}

#[must_use]
pub(super) fn read_env_f64(env: &dyn EnvSource, name: &str) -> Option<f64> {
    read_non_empty_env(env, name)
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

#[must_use]
pub(super) fn read_env_bool(env: &dyn EnvSource, name: &str) -> Option<bool> {
    read_non_empty_env(env, name).map(|raw| crate::llm_io::parse_env_bool(Some(&raw)))
}
