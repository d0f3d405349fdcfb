use std::{net::SocketAddr, sync::OnceLock};

use ffmpeg_relay::FanOutPolicy;

const DEFAULT_LISTEN: &str = "0.0.0.0:3001";
const DEFAULT_FFMPEG: &str = "ffmpeg";
const DEFAULT_INGEST_RTMP_URL: &str = "rtmp://ingest.streamforge.com/live";
const DEFAULT_INGEST_STREAM_KEY: &str = "live_user_key_12345";
// ~6.4s of input at the capture client's 100ms cadence
const DEFAULT_CONDUIT_DEPTH: usize = 64;
const DEFAULT_INGEST_FORMAT: &str = "webm";

#[derive(Clone, Debug)]
pub struct StreamforgeConfig {
    listen: SocketAddr,
    ffmpeg_path: String,
    ingest_rtmp_url: String,
    ingest_stream_key: String,
    conduit_depth: usize,
    ingest_format: String,
    fan_out: FanOutPolicy,
}

impl Default for StreamforgeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3001)),
            ffmpeg_path: DEFAULT_FFMPEG.to_string(),
            ingest_rtmp_url: DEFAULT_INGEST_RTMP_URL.to_string(),
            ingest_stream_key: DEFAULT_INGEST_STREAM_KEY.to_string(),
            conduit_depth: DEFAULT_CONDUIT_DEPTH,
            ingest_format: DEFAULT_INGEST_FORMAT.to_string(),
            fan_out: FanOutPolicy::Abort,
        }
    }
}

impl StreamforgeConfig {
    /// Reads `STREAMFORGE_*` variables through `lookup`, falling back to
    /// defaults for anything unset or blank.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen = get("STREAMFORGE_LISTEN").unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen = listen
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid STREAMFORGE_LISTEN {:?}: {}", listen, e))?;

        let conduit_depth = match get("STREAMFORGE_CONDUIT_DEPTH") {
            Some(raw) => {
                let depth = raw.trim().parse::<usize>().map_err(|e| {
                    anyhow::anyhow!("invalid STREAMFORGE_CONDUIT_DEPTH {:?}: {}", raw, e)
                })?;
                if depth == 0 {
                    anyhow::bail!("STREAMFORGE_CONDUIT_DEPTH must be at least 1");
                }
                depth
            }
            None => DEFAULT_CONDUIT_DEPTH,
        };

        let fan_out = match get("STREAMFORGE_FAN_OUT") {
            Some(raw) => raw
                .parse::<FanOutPolicy>()
                .map_err(|e| anyhow::anyhow!("invalid STREAMFORGE_FAN_OUT: {}", e))?,
            None => FanOutPolicy::Abort,
        };

        Ok(Self {
            listen,
            ffmpeg_path: get("STREAMFORGE_FFMPEG").unwrap_or_else(|| DEFAULT_FFMPEG.to_string()),
            ingest_rtmp_url: get("STREAMFORGE_INGEST_RTMP_URL")
                .unwrap_or_else(|| DEFAULT_INGEST_RTMP_URL.to_string()),
            ingest_stream_key: get("STREAMFORGE_INGEST_STREAM_KEY")
                .unwrap_or_else(|| DEFAULT_INGEST_STREAM_KEY.to_string()),
            conduit_depth,
            ingest_format: get("STREAMFORGE_INGEST_FORMAT")
                .unwrap_or_else(|| DEFAULT_INGEST_FORMAT.to_string()),
            fan_out,
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn listen(&self) -> SocketAddr {
        self.listen
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    pub fn ingest_rtmp_url(&self) -> &str {
        &self.ingest_rtmp_url
    }

    pub fn ingest_stream_key(&self) -> &str {
        &self.ingest_stream_key
    }

    pub fn conduit_depth(&self) -> usize {
        self.conduit_depth
    }

    pub fn ingest_format(&self) -> &str {
        &self.ingest_format
    }

    pub fn fan_out(&self) -> FanOutPolicy {
        self.fan_out
    }
}

static CONFIG: OnceLock<StreamforgeConfig> = OnceLock::new();

/// Loads `.env` and the environment once. Later calls return the same config.
pub fn init() -> anyhow::Result<&'static StreamforgeConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }
    dotenv::dotenv().ok();
    let config = StreamforgeConfig::from_env()?;
    Ok(CONFIG.get_or_init(|| config))
}
