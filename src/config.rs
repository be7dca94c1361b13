use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "5000")]
    pub port: u16,

    /// Explicit pipeline location; skips the search paths when set
    #[envconfig(from = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    #[envconfig(
        from = "MODEL_SEARCH_PATHS",
        default = "/home/site/wwwroot/models/clustering_pipeline.json"
    )]
    pub model_search_paths: PathList,

    #[envconfig(from = "OUTPUT_DIR", default = "./data")]
    pub output_dir: PathBuf,

    #[envconfig(from = "RENDER_CHARTS", default = "true")]
    pub render_charts: bool,

    #[envconfig(from = "MAX_UPLOAD_BYTES", default = "26214400")]
    pub max_upload_bytes: usize,

    /// Labeled result files kept in `output_dir`; older ones are deleted
    #[envconfig(from = "RESULT_RETENTION", default = "20")]
    pub result_retention: usize,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[cfg(test)]
    pub fn default_for_tests() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            model_path: None,
            model_search_paths: PathList::default(),
            output_dir: std::env::temp_dir(),
            render_charts: false,
            max_upload_bytes: 1024 * 1024,
            result_retention: 5,
            debug: true,
        }
    }
}

/// Comma-separated list of candidate paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathList(pub Vec<PathBuf>);

impl FromStr for PathList {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PathList(
            s.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect(),
        ))
    }
}
