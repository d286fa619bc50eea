use super::*;
use std::path::{Path, PathBuf};

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

fn options() -> getopts::Options {
    let mut opts = getopts::Options::new();
    opts.optflag("h", "help", "print this help menu")
        .optflag("v", "version", "print the version information")
        .optopt("c", "config", "use a custom configuration file", "FILE");
    opts
}

pub fn config_dir() -> PathBuf {
    directories::ProjectDirs::from("dtn", "dtnd", PKG_NAME).map_or_else(
        || {
            cfg_if::cfg_if! {
                if #[cfg(target_os = "linux")] {
                    Path::new("/etc/opt").join(PKG_NAME)
                } else if #[cfg(unix)] {
                    Path::new("/etc").join(PKG_NAME)
                } else if #[cfg(windows)] {
                    std::env::current_exe()
                        .map(|p| p.with_file_name(PKG_NAME))
                        .unwrap_or_else(|_| PathBuf::from(PKG_NAME))
                } else {
                    compile_error!("No idea how to determine default config directory for target platform")
                }
            }
        },
        |proj_dirs| proj_dirs.config_local_dir().to_path_buf(),
    )
}

fn init_logger(config: &config::Config) {
    let log_level = get(config, "log_level")
        .trace_expect("Invalid 'log_level' value in configuration")
        .unwrap_or("info")
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .trace_expect("Invalid log level");

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(
            log_level > tracing_subscriber::filter::LevelFilter::from_level(tracing::Level::INFO),
        )
        .init();
}

pub fn init() -> Option<config::Config> {
    let opts = options();
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| PKG_NAME.to_string());
    let flags = opts
        .parse(args.iter().skip(1))
        .trace_expect("Failed to parse command line args");
    if flags.opt_present("h") {
        let brief = format!(
            "{PKG_NAME} {PKG_VERSION} - {PKG_DESCRIPTION}\n\nUsage: {program} [options]"
        );
        print!("{}", opts.usage(&brief));
        return None;
    }
    if flags.opt_present("v") {
        println!("{PKG_VERSION}");
        return None;
    }

    let mut b = config::Config::builder();

    let config_source: String;
    if let Some(source) = flags.opt_str("config") {
        config_source =
            format!("Using base configuration file '{source}' specified on command line");
        b = b.add_source(config::File::with_name(&source).format(config::FileFormat::Toml))
    } else if let Ok(source) = std::env::var("DTND_SERVER_CONFIG_FILE") {
        config_source = format!(
            "Using base configuration file '{source}' specified by DTND_SERVER_CONFIG_FILE environment variable"
        );
        b = b.add_source(config::File::with_name(&source).format(config::FileFormat::Toml))
    } else {
        let path = config_dir().join(format!("{PKG_NAME}.config"));
        config_source = format!(
            "Using optional base configuration file '{}'",
            path.display()
        );
        b = b.add_source(
            config::File::from(path)
                .required(false)
                .format(config::FileFormat::Toml),
        )
    }

    // Nested keys use a double underscore, e.g. DTND_SERVER_LINK_RETRY__MAX_INTERVAL
    b = b.add_source(
        config::Environment::with_prefix("DTND_SERVER")
            .prefix_separator("_")
            .separator("__"),
    );

    let config = b.build().trace_expect("Failed to load configuration");

    init_logger(&config);
    info!("{PKG_NAME} version {PKG_VERSION} starting...");
    info!("{config_source}");

    Some(config)
}

pub fn get<'de, T: serde::Deserialize<'de>>(
    config: &config::Config,
    key: &str,
) -> Result<Option<T>, config::ConfigError> {
    match config.get::<T>(key) {
        Ok(v) => Ok(Some(v)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn init_storage(config: &config::Config) -> Arc<dyn dtnd::storage::BundleStorage> {
    let default_config = dtnd::storage::bundle_mem::Config::default();
    let storage_config = dtnd::storage::bundle_mem::Config {
        capacity: get(config, "mem_storage.capacity")
            .trace_expect("Invalid 'mem_storage.capacity' value in configuration")
            .unwrap_or(default_config.capacity),
        min_bundles: get(config, "mem_storage.min_bundles")
            .trace_expect("Invalid 'mem_storage.min_bundles' value in configuration")
            .unwrap_or(default_config.min_bundles),
    };
    info!(
        "Using in-memory bundle storage, {} bytes",
        storage_config.capacity
    );
    dtnd::storage::bundle_mem::new(&storage_config)
}

pub fn load_daemon_config(config: &config::Config) -> dtnd::config::Config {
    let default_config = dtnd::config::Config::default();
    let config = dtnd::config::Config {
        local_eid: get::<String>(config, "local_eid")
            .trace_expect("Invalid 'local_eid' value in configuration")
            .map(Into::into)
            .unwrap_or(default_config.local_eid),
        accept_custody: get(config, "accept_custody")
            .trace_expect("Invalid 'accept_custody' value in configuration")
            .unwrap_or(default_config.accept_custody),
        early_deletion: get(config, "early_deletion")
            .trace_expect("Invalid 'early_deletion' value in configuration")
            .unwrap_or(default_config.early_deletion),
        retry_reliable_unacked: get(config, "retry_reliable_unacked")
            .trace_expect("Invalid 'retry_reliable_unacked' value in configuration")
            .unwrap_or(default_config.retry_reliable_unacked),
        status_reports: get(config, "status_reports")
            .trace_expect("Invalid 'status_reports' value in configuration")
            .unwrap_or(default_config.status_reports),
        custody_timer: get(config, "custody_timer")
            .trace_expect("Invalid 'custody_timer' value in configuration")
            .unwrap_or(default_config.custody_timer),
        slow_event_threshold_ms: get(config, "slow_event_threshold_ms")
            .trace_expect("Invalid 'slow_event_threshold_ms' value in configuration")
            .unwrap_or(default_config.slow_event_threshold_ms),
        link_retry: get(config, "link_retry")
            .trace_expect("Invalid 'link_retry' value in configuration")
            .unwrap_or(default_config.link_retry),
    };

    if config.link_retry.min_interval == 0
        || config.link_retry.max_interval < config.link_retry.min_interval
    {
        error!(
            "Invalid 'link_retry' intervals in configuration: {}..{}",
            config.link_retry.min_interval, config.link_retry.max_interval
        );
        panic!("Invalid 'link_retry' intervals in configuration");
    }

    info!("Local endpoint is {}", config.local_eid);
    if config.accept_custody {
        info!("Custody transfer is enabled");
    }
    if config.status_reports {
        info!("Bundle status reports are enabled");
    }
    if !config.early_deletion {
        info!("Early deletion disabled by configuration, bundles are kept until they expire");
    }

    config
}
