use std::path::PathBuf;

use clap::Parser;

/// Continuously back up immutable data files to S3-compatible storage.
///
/// Settings given on the command line override the configuration file.
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Destination bucket
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region [default: us-east-1]
    #[arg(long)]
    pub region: Option<String>,

    /// Service endpoint URL, for S3-compatible stores other than AWS
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Address the bucket as `endpoint/bucket` instead of `bucket.endpoint`
    #[arg(long)]
    pub path_style: bool,

    /// Request server-side encryption of every object
    #[arg(long)]
    pub sse: bool,

    /// Prefix of every remote key
    #[arg(long)]
    pub prefix: Option<String>,

    /// Host name used in remote keys [default: this machine's host name]
    #[arg(long)]
    pub name: Option<String>,

    /// Separator between host name and local path in remote keys [default: ":"]
    #[arg(long)]
    pub separator: Option<String>,

    /// Watch and walk subdirectories too
    #[arg(short, long)]
    pub recursive: bool,

    /// Start watching directories created under a watched directory
    #[arg(short, long)]
    pub auto_add: bool,

    /// Also upload files when they are closed after writing, for writers
    /// that do not rename finished files into place
    #[arg(long)]
    pub listen_close_write: bool,

    /// Number of upload workers [default: 4]
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Largest file sent in a single request, in MiB [default: 4096]
    #[arg(long)]
    pub max_upload_size: Option<u64>,

    /// Multipart chunk size, in MiB [default: 256]
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Attempts per file before giving up until the next walk [default: 3]
    #[arg(long)]
    pub retries: Option<u32>,

    /// Seconds between reconciliation walks [default: 3600]
    #[arg(long)]
    pub walk_interval: Option<u64>,

    /// Walk all watched directories at startup
    #[arg(long)]
    pub backup: bool,

    /// Walk once, upload what is missing and exit
    #[arg(long)]
    pub once: bool,

    /// Skip paths matching this regex
    #[arg(long)]
    pub exclude: Option<String>,

    /// Only back up paths matching this regex
    #[arg(long)]
    pub include: Option<String>,

    /// File-name marker of files still being written [default: "-tmp"]
    #[arg(long)]
    pub transient_marker: Option<String>,

    /// Upload to an in-process store instead of a bucket (dry run)
    #[arg(long)]
    pub memory_store: bool,

    /// Directories to watch
    pub paths: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_short_flags_and_paths() {
        let cli = Cli::try_parse_from([
            "tablevault",
            "-r",
            "-a",
            "-t",
            "8",
            "--bucket",
            "backups",
            "/var/lib/cassandra/data",
            "/srv/extra",
        ])
        .unwrap();
        assert!(cli.recursive);
        assert!(cli.auto_add);
        assert_eq!(cli.threads, Some(8));
        assert_eq!(cli.bucket.as_deref(), Some("backups"));
        assert_eq!(cli.paths.len(), 2);
        assert!(!cli.once);
        assert!(!cli.listen_close_write);
    }

    #[test]
    fn close_write_is_opt_in() {
        let cli = Cli::try_parse_from(["tablevault", "--listen-close-write", "/data"]).unwrap();
        assert!(cli.listen_close_write);
    }
}
