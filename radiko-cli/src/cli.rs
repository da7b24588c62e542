use clap::Parser;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Record a radiko time-shift program",
    long_about = "Records a past broadcast window from radiko's time-shift service into a\n\
                  local audio file. Member credentials are read from RADIKO_MAIL and\n\
                  RADIKO_PASSWORD. Times are YYYYMMDDHHMM in Japan Standard Time and must\n\
                  lie within the last seven days."
)]
pub struct CliArgs {
    /// Station identifier, e.g. TBS or LFR
    #[arg(help = "Station identifier (e.g. TBS, LFR)")]
    pub station: String,

    /// Window start, YYYYMMDDHHMM
    #[arg(help = "Start of the program, YYYYMMDDHHMM (JST)")]
    pub from: String,

    /// Window end, YYYYMMDDHHMM
    #[arg(help = "End of the program, YYYYMMDDHHMM (JST)")]
    pub to: String,

    /// Output file
    #[arg(
        short,
        long,
        help = "Output file (default: <station>_<from>.m4a, or .aac with --raw)"
    )]
    pub output: Option<PathBuf>,

    /// Write the decrypted stream without remuxing
    #[arg(long, help = "Write the raw ADTS AAC stream instead of remuxing with ffmpeg")]
    pub raw: bool,

    #[arg(long, default_value = "ffmpeg", help = "Path to the ffmpeg binary")]
    pub ffmpeg: PathBuf,

    /// Number of concurrent segment downloads
    #[arg(
        long,
        default_value = "3",
        help = "Maximum number of concurrent segment downloads"
    )]
    pub concurrency: usize,

    /// Segment retry attempts
    #[arg(
        long,
        default_value = "3",
        help = "Number of retry attempts for failed segment downloads"
    )]
    pub retries: u32,

    /// Overall recording deadline in seconds
    #[arg(
        long,
        help = "Abort the recording after this many seconds (default: 3x the window plus 2 minutes)"
    )]
    pub deadline: Option<u64>,

    #[arg(
        long,
        default_value = "30",
        help = "Overall timeout in seconds for HTTP requests"
    )]
    pub timeout: u64,

    #[arg(
        long,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Custom HTTP headers
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(
        long,
        help = "Proxy server URL (e.g., \"http://proxy.example.com:8080\")"
    )]
    pub proxy: Option<String>,

    /// Proxy type (http, https, socks5, all)
    #[arg(
        long,
        default_value = "all",
        help = "Proxy type (http, https, socks5, all)",
        value_parser = ["http", "https", "socks5", "all"]
    )]
    pub proxy_type: String,

    #[arg(long, help = "Username for proxy authentication")]
    pub proxy_user: Option<String>,

    #[arg(long, help = "Password for proxy authentication")]
    pub proxy_pass: Option<String>,

    /// Disable all proxy settings
    #[arg(
        long,
        help = "Disable all proxy settings (including system proxy)"
    )]
    pub no_proxy: bool,

    #[arg(long, help = "Do not render a progress bar")]
    pub no_progress: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,

    #[arg(long, help = "Also write log output to this file")]
    pub log_file: Option<PathBuf>,
}

impl CliArgs {
    pub fn default_output(&self) -> PathBuf {
        let extension = if self.raw { "aac" } else { "m4a" };
        PathBuf::from(format!("{}_{}.{extension}", self.station, self.from))
    }
}
