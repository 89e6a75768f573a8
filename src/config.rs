use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use logdeck_k8s::{ContainerOverrides, KubeOptions, LogOptions, OverrideError};
use logdeck_logs::DEFAULT_MAX_SORT;

/// Poll interval for gcloud sources when neither flag nor file sets one
pub const DEFAULT_GCLOUD_POLL: Duration = Duration::from_secs(5);

/// Invalid command line or config file; reported with exit code 2
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot combine --previous with --follow")]
    PreviousWithFollow,

    #[error("no log source selected, use --pod, --deploy, --label, --gcloud or --listen")]
    NoSources,

    #[error("kubeconfig {} not found", .0.display())]
    MissingKubeconfig(PathBuf),

    #[error("--gcloud needs a project, set --gcloud-project or gcloud_project in the config file")]
    MissingGcloudProject,

    #[error("--max-sort must be at least 2, got {0}")]
    MaxSort(usize),

    #[error(transparent)]
    Overrides(#[from] OverrideError),

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Defaults read from the TOML config file. Flags win over these.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub kubeconfig: Option<PathBuf>,
    pub containers: Option<String>,
    pub gcloud_project: Option<String>,
    /// Seconds between two gcloud polls
    pub gcloud_poll: Option<u64>,
    pub max_sort: Option<usize>,
    pub lookup_key: Option<String>,
    pub exclude: Vec<String>,
    pub durations: Vec<String>,
}

impl FileConfig {
    /// `~/.config/logdeck/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("logdeck").join("config.toml"))
    }

    /// Load `path`, or the default path when none is given. Only an
    /// explicitly named file has to exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if !required && e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
    }
}

/// Flags of `logdeck aggregate`
#[derive(Args, Debug, Default)]
pub struct AggregateArgs {
    /// Stream logs from these pods
    #[arg(long = "pod", value_name = "POD")]
    pub pods: Vec<String>,

    /// Stream logs from the pods of these deployments
    #[arg(long = "deploy", value_name = "DEPLOYMENT")]
    pub deployments: Vec<String>,

    /// Stream logs from pods matching these label selectors
    #[arg(long = "label", value_name = "SELECTOR")]
    pub labels: Vec<String>,

    /// Stream these gcloud logs
    #[arg(long = "gcloud", value_name = "LOG_NAME")]
    pub gcloud: Vec<String>,

    /// Listen for logs POSTed over HTTP on this address
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Path to the kubeconfig (default: ~/.kube/config)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context
    #[arg(long)]
    pub context: Option<String>,

    /// Kubernetes namespace
    #[arg(long)]
    pub namespace: Option<String>,

    /// Only logs newer than this (e.g. 30s, 5m, 1h30m)
    #[arg(long, value_parser = parse_duration)]
    pub since: Option<Duration>,

    /// Number of past lines per source, -1 for all
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub tail: i64,

    /// Containers for pods and deployments, e.g. 'deploy/api:server;pod/worker-*:app'.
    /// Keys can use * and ? for pattern matching
    #[arg(long)]
    pub containers: Option<String>,

    /// Google Cloud project of the --gcloud logs
    #[arg(long)]
    pub gcloud_project: Option<String>,

    /// Time between two gcloud polls
    #[arg(long, value_parser = parse_duration)]
    pub gcloud_poll: Option<Duration>,

    /// Keep streaming as new logs arrive
    #[arg(short, long)]
    pub follow: bool,

    /// Show logs of the previous container instances
    #[arg(long)]
    pub previous: bool,

    /// Emit a record carrying our pid before streaming
    #[arg(long)]
    pub pid: bool,
}

/// Validated settings of `logdeck aggregate`
#[derive(Debug)]
pub struct AggregateConfig {
    pub pods: Vec<String>,
    pub deployments: Vec<String>,
    pub labels: Vec<String>,
    pub gcloud: Vec<String>,
    pub listen: Option<String>,
    /// Set when any Kubernetes source is selected
    pub kube: Option<KubeOptions>,
    pub overrides: ContainerOverrides,
    pub log_options: LogOptions,
    pub gcloud_project: Option<String>,
    pub gcloud_poll: Duration,
    pub follow: bool,
    pub pid: bool,
}

impl AggregateArgs {
    pub fn resolve(self, file: &FileConfig) -> Result<AggregateConfig, ConfigError> {
        if self.previous && self.follow {
            return Err(ConfigError::PreviousWithFollow);
        }

        let uses_kube = !(self.pods.is_empty() && self.deployments.is_empty() && self.labels.is_empty());
        if !uses_kube && self.gcloud.is_empty() && self.listen.is_none() {
            return Err(ConfigError::NoSources);
        }

        let mut overrides = ContainerOverrides::new();
        if let Some(containers) = &file.containers {
            overrides.apply(containers)?;
        }
        if let Some(containers) = &self.containers {
            overrides.apply(containers)?;
        }

        let kube = if uses_kube {
            let kubeconfig = self
                .kubeconfig
                .or_else(|| file.kubeconfig.clone())
                .or_else(|| dirs::home_dir().map(|home| home.join(".kube").join("config")))
                .unwrap_or_else(|| PathBuf::from(".kube/config"));
            if !kubeconfig.is_file() {
                return Err(ConfigError::MissingKubeconfig(kubeconfig));
            }
            Some(KubeOptions {
                kubeconfig,
                context: self.context,
                namespace: self.namespace,
            })
        } else {
            None
        };

        let gcloud_project = self.gcloud_project.or_else(|| file.gcloud_project.clone());
        if !self.gcloud.is_empty() && gcloud_project.is_none() {
            return Err(ConfigError::MissingGcloudProject);
        }

        Ok(AggregateConfig {
            pods: self.pods,
            deployments: self.deployments,
            labels: self.labels,
            gcloud: self.gcloud,
            listen: self.listen,
            kube,
            overrides,
            log_options: LogOptions {
                follow: self.follow,
                previous: self.previous,
                since: self.since,
                tail: Some(self.tail).filter(|tail| *tail >= 0),
            },
            gcloud_project,
            gcloud_poll: self
                .gcloud_poll
                .or_else(|| file.gcloud_poll.map(Duration::from_secs))
                .unwrap_or(DEFAULT_GCLOUD_POLL),
            follow: self.follow,
            pid: self.pid,
        })
    }
}

/// Flags of `logdeck dashboard`
#[derive(Args, Debug, Default)]
pub struct DashboardArgs {
    /// Hide these keys (comma separated or repeated)
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Render these keys (nanoseconds) as durations
    #[arg(long, value_delimiter = ',')]
    pub durations: Vec<String>,

    /// Key used to build a filter from the selected entry in lookup mode
    #[arg(long)]
    pub lookup_key: Option<String>,

    /// Initial filter query
    #[arg(long)]
    pub filter: Option<String>,

    /// Number of most recent entries kept sorted by time
    #[arg(long)]
    pub max_sort: Option<usize>,
}

/// Validated settings of `logdeck dashboard`
#[derive(Debug, PartialEq)]
pub struct DashboardConfig {
    pub exclude: Vec<String>,
    pub durations: Vec<String>,
    pub lookup_key: Option<String>,
    pub filter: Option<String>,
    pub max_sort: usize,
}

impl DashboardArgs {
    pub fn resolve(self, file: &FileConfig) -> Result<DashboardConfig, ConfigError> {
        let max_sort = self.max_sort.or(file.max_sort).unwrap_or(DEFAULT_MAX_SORT);
        if max_sort < 2 {
            return Err(ConfigError::MaxSort(max_sort));
        }

        let or_file = |flags: Vec<String>, from_file: &[String]| {
            if flags.is_empty() { from_file.to_vec() } else { flags }
        };

        Ok(DashboardConfig {
            exclude: or_file(self.exclude, &file.exclude),
            durations: or_file(self.durations, &file.durations),
            lookup_key: self.lookup_key.or_else(|| file.lookup_key.clone()),
            filter: self.filter,
            max_sort,
        })
    }
}

/// Parse durations such as `90s`, `5m`, `1h30m`, `250ms`; a bare number is seconds
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {:?}", input))?;
        let (number, tail) = rest.split_at(digits);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration {:?}", input))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let unit_nanos: u64 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => return Err(format!("unknown unit {:?} in duration {:?}", unit, input)),
        };

        total += Duration::from_nanos((value * unit_nanos as f64).round() as u64);
        rest = tail;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate() -> AggregateArgs {
        AggregateArgs {
            tail: -1,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn test_previous_with_follow() {
        let args = AggregateArgs {
            follow: true,
            previous: true,
            listen: Some("127.0.0.1:0".to_string()),
            ..aggregate()
        };
        assert!(matches!(args.resolve(&FileConfig::default()), Err(ConfigError::PreviousWithFollow)));
    }

    #[test]
    fn test_no_sources() {
        assert!(matches!(aggregate().resolve(&FileConfig::default()), Err(ConfigError::NoSources)));
    }

    #[test]
    fn test_missing_kubeconfig() {
        let args = AggregateArgs {
            pods: vec!["api-1".to_string()],
            kubeconfig: Some(PathBuf::from("/nonexistent/logdeck/kubeconfig")),
            ..aggregate()
        };
        assert!(matches!(
            args.resolve(&FileConfig::default()),
            Err(ConfigError::MissingKubeconfig(_))
        ));
    }

    #[test]
    fn test_malformed_overrides() {
        let args = AggregateArgs {
            listen: Some("127.0.0.1:0".to_string()),
            containers: Some("deploy/api".to_string()),
            ..aggregate()
        };
        assert!(matches!(args.resolve(&FileConfig::default()), Err(ConfigError::Overrides(_))));
    }

    #[test]
    fn test_gcloud_needs_project() {
        let args = AggregateArgs {
            gcloud: vec!["api".to_string()],
            ..aggregate()
        };
        assert!(matches!(
            args.resolve(&FileConfig::default()),
            Err(ConfigError::MissingGcloudProject)
        ));

        let file = FileConfig {
            gcloud_project: Some("acme".to_string()),
            gcloud_poll: Some(10),
            ..Default::default()
        };
        let args = AggregateArgs {
            gcloud: vec!["api".to_string()],
            tail: 50,
            ..aggregate()
        };
        let config = args.resolve(&file).unwrap();
        assert_eq!(config.gcloud_project.as_deref(), Some("acme"));
        assert_eq!(config.gcloud_poll, Duration::from_secs(10));
        assert_eq!(config.log_options.tail, Some(50));
        assert!(config.kube.is_none());
    }

    #[test]
    fn test_flags_override_file() {
        let file = FileConfig {
            containers: Some("deploy/api:server".to_string()),
            ..Default::default()
        };
        let args = AggregateArgs {
            listen: Some("127.0.0.1:0".to_string()),
            containers: Some("deploy/api:proxy".to_string()),
            ..aggregate()
        };
        let config = args.resolve(&file).unwrap();
        assert_eq!(config.overrides.matches("deploy/api"), Some("proxy"));
        assert_eq!(config.log_options.tail, None);
    }

    #[test]
    fn test_dashboard_resolve() {
        let file = FileConfig {
            exclude: vec!["caller".to_string()],
            lookup_key: Some("request_id".to_string()),
            max_sort: Some(500),
            ..Default::default()
        };

        let config = DashboardArgs::default().resolve(&file).unwrap();
        assert_eq!(config.exclude, vec!["caller".to_string()]);
        assert_eq!(config.lookup_key.as_deref(), Some("request_id"));
        assert_eq!(config.max_sort, 500);

        let args = DashboardArgs {
            exclude: vec!["host".to_string()],
            max_sort: Some(1),
            ..Default::default()
        };
        assert!(matches!(args.resolve(&file), Err(ConfigError::MaxSort(1))));
    }

    #[test]
    fn test_file_config() {
        let config: FileConfig = toml::from_str(
            r#"
            gcloud_project = "acme"
            gcloud_poll = 3
            exclude = ["caller", "host"]
            "#,
        )
        .unwrap();
        assert_eq!(config.gcloud_project.as_deref(), Some("acme"));
        assert_eq!(config.exclude.len(), 2);

        assert!(toml::from_str::<FileConfig>("unknown = 1").is_err());
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let path = Path::new("/nonexistent/logdeck/config.toml");
        assert!(matches!(FileConfig::load(Some(path)), Err(ConfigError::Read { .. })));
    }
}
