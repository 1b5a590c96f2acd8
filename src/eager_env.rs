use std::env;
use std::sync::LazyLock;

fn parse_env_var<T: std::str::FromStr>(env_name: &str, fallback: Option<&str>) -> T {
    let val = match (env::var(env_name), fallback) {
        (Ok(val), _) => val,
        (Err(_), Some(fallback)) => fallback.to_string(),
        (Err(_), None) => panic!("Missing required environment variable: {env_name}"),
    };

    val.parse::<T>().unwrap_or_else(|_| {
        panic!(
            "Failed to parse environment variable {} with value '{}' as {}",
            env_name,
            val,
            std::any::type_name::<T>()
        )
    })
}

/// Declares one lazily parsed static per variable. An optional trailing
/// literal is used when the variable is unset.
macro_rules! define_env_vars {
    ($(($name:ident, $env_name:expr, $type:ty $(, $fallback:literal)?)),* $(,)?) => {
        $(
            pub static $name: LazyLock<$type> = LazyLock::new(|| {
                #[allow(unused_mut, unused_assignments)]
                let mut fallback: Option<&str> = None;
                $( fallback = Some($fallback); )?
                parse_env_var::<$type>($env_name, fallback)
            });
        )*

        /// Force initialization of all environment variables at startup
        /// Call this early in main() to fail fast if any env vars are missing
        pub fn check_env() {
            $(
                let _ = *$name;
            )*
        }
    };
}

define_env_vars!(
    (DATABASE_NODE_URLS, "DATABASE_NODE_URLS", String),
    (DATABASE_KEYSPACE, "DATABASE_KEYSPACE", String),
    (
        DATABASE_CONCURRENT_REQUESTS,
        "DATABASE_CONCURRENT_REQUESTS",
        usize,
        "16"
    ),
    (
        RECALCULATION_INTERVAL_SECONDS,
        "RECALCULATION_INTERVAL_SECONDS",
        u64,
        "300"
    ),
);
