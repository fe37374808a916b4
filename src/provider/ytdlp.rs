//! `yt-dlp` subprocess provider.
//!
//! Listing runs `yt-dlp --flat-playlist --dump-single-json <url>`. Downloads
//! run one `yt-dlp` process per item with the output template
//! `%(title)s [%(id)s].%(ext)s` and print a JSON object with the final path
//! after post-processing, so the engine learns exactly which file was produced.
//!
//! With `debug` set, yt-dlp runs with `-v` and each download's command line,
//! exit status and stderr are appended to `yt-dlp-debug.log` in the playlist
//! folder.
//!
//! Install yt-dlp (and ffmpeg for metadata embedding):
//! - Windows: `winget install yt-dlp.yt-dlp Gyan.FFmpeg`
//! - macOS: `brew install yt-dlp ffmpeg`
//! - Linux: `pipx install yt-dlp` and `apt install ffmpeg`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::dto::{MovedFileDto, PlaylistDto};
use super::{DownloadedItem, FetchProvider, ProviderError, ProviderErrorKind};
use crate::config::ProviderConfig;
use crate::model::RemoteItem;
use crate::naming;

/// Output template handed to yt-dlp. The scanner understands this shape.
pub const OUTPUT_TEMPLATE: &str = "%(title)s [%(id)s].%(ext)s";

/// Fields printed after the final move, as one JSON object per line.
const PRINT_TEMPLATE: &str = "after_move:%(.{title,uploader,filepath})j";

/// Verbose tool output in debug mode, one per playlist folder.
pub const DEBUG_LOG_FILE: &str = "yt-dlp-debug.log";

/// Production provider backed by the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlpProvider {
    binary: String,
    cookies_file: Option<PathBuf>,
    format: String,
    extra_args: Vec<String>,
    list_timeout: Duration,
    download_timeout: Duration,
    debug: bool,
}

impl YtDlpProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            cookies_file: config.cookies_file.clone(),
            format: config.audio_format.clone(),
            extra_args: config.extra_args.clone(),
            list_timeout: Duration::from_secs(config.list_timeout_secs.max(1)),
            download_timeout: Duration::from_secs(config.download_timeout_secs.max(1)),
            debug: config.debug,
        }
    }

    /// Cookie file argument, only when the file actually exists.
    fn cookie_args(&self) -> Vec<String> {
        match &self.cookies_file {
            Some(path) if path.is_file() => {
                vec!["--cookies".to_string(), path.to_string_lossy().into_owned()]
            }
            Some(path) => {
                tracing::debug!("Cookie file {:?} not found, continuing without it", path);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    fn list_args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = vec!["--flat-playlist".into(), "--dump-single-json".into()];
        args.push(if self.debug { "-v" } else { "--no-warnings" }.into());
        args.extend(self.cookie_args());
        args.extend(self.extra_args.iter().cloned());
        args.push(url.to_string());
        args
    }

    fn download_args(&self, id: &str, dest_dir: &Path) -> Vec<String> {
        let output = dest_dir.join(OUTPUT_TEMPLATE);
        let mut args: Vec<String> = vec![
            "-f".into(),
            self.format.clone(),
            "--add-metadata".into(),
            "--no-overwrites".into(),
            "--no-playlist".into(),
            "--no-progress".into(),
            "--retries".into(),
            "3".into(),
            "-o".into(),
            output.to_string_lossy().into_owned(),
            "--no-simulate".into(),
            "--print".into(),
            PRINT_TEMPLATE.into(),
        ];
        if self.debug {
            args.push("-v".into());
        }
        args.extend(self.cookie_args());
        args.extend(self.extra_args.iter().cloned());
        args.push("--".into());
        args.push(watch_url(id));
        args
    }

    /// Run the tool and collect stdout, mapping failures to provider errors.
    ///
    /// In debug mode the run is also appended to the log in `log_dir`.
    async fn run(&self, args: &[String], limit: Duration, log_dir: Option<&Path>) -> Result<String, ProviderError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(binary = %self.binary, ?args, "Spawning provider");

        let output = match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProviderError::new(
                    ProviderErrorKind::ToolMissing,
                    format!("{} not found. Install it or set provider.binary", self.binary),
                ));
            }
            Ok(Err(e)) => {
                return Err(ProviderError::new(
                    ProviderErrorKind::Other,
                    format!("Failed to run {}: {}", self.binary, e),
                ));
            }
            Err(_) => {
                let message = format!("{} did not finish within {}s", self.binary, limit.as_secs());
                self.log_run(log_dir, args, &message, "").await;
                return Err(ProviderError::new(ProviderErrorKind::Timeout, message));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        self.log_run(log_dir, args, &output.status.to_string(), &stderr).await;

        if !output.status.success() {
            return Err(ProviderError::from_stderr(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Append one run to the debug log. Logging problems never fail a download.
    async fn log_run(&self, log_dir: Option<&Path>, args: &[String], status: &str, stderr: &str) {
        let Some(dir) = log_dir.filter(|_| self.debug) else {
            return;
        };
        let path = dir.join(DEBUG_LOG_FILE);
        let entry = debug_log_entry(&self.binary, args, status, stderr);

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await;
        let result = match file {
            Ok(mut file) => file.write_all(entry.as_bytes()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!("Could not write debug log {:?}: {}", path, e);
        }
    }
}

/// One debug log block: header, command line, exit status and stderr.
fn debug_log_entry(binary: &str, args: &[String], status: &str, stderr: &str) -> String {
    let mut entry = format!(
        "---- yt-dlp run: {} ----\nCommand: {} {}\nStatus: {}\n",
        chrono::Local::now().format("%Y-%m-%dT%H:%M:%S"),
        binary,
        args.join(" "),
        status
    );
    entry.push_str(stderr);
    if !stderr.ends_with('\n') {
        entry.push('\n');
    }
    entry
}

#[async_trait]
impl FetchProvider for YtDlpProvider {
    async fn list_playlist(&self, url: &str) -> Result<Vec<RemoteItem>, ProviderError> {
        let stdout = self.run(&self.list_args(url), self.list_timeout, None).await?;
        parse_playlist_json(&stdout)
    }

    async fn download(&self, id: &str, dest_dir: &Path) -> Result<DownloadedItem, ProviderError> {
        tokio::fs::create_dir_all(dest_dir).await.map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Other,
                format!("Cannot create {}: {}", dest_dir.display(), e),
            )
        })?;

        let stdout = self
            .run(&self.download_args(id, dest_dir), self.download_timeout, Some(dest_dir))
            .await?;

        if let Some(item) = parse_print_output(&stdout) {
            return Ok(item);
        }

        // --no-overwrites skips an existing file without printing it
        find_download(dest_dir, id).ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Parse,
                format!("download of {} reported success but no file was found", id),
            )
        })
    }
}

fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}

/// Parse `--dump-single-json` output.
pub fn parse_playlist_json(json: &str) -> Result<Vec<RemoteItem>, ProviderError> {
    let dto: PlaylistDto = serde_json::from_str(json.trim()).map_err(|e| {
        ProviderError::new(
            ProviderErrorKind::Parse,
            format!("Failed to parse playlist listing: {}", e),
        )
    })?;
    Ok(dto.into_items())
}

/// Parse the JSON line printed after the final move. Other stdout lines
/// (verbose output in debug mode) are skipped.
fn parse_print_output(stdout: &str) -> Option<DownloadedItem> {
    let dto = stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str::<MovedFileDto>(l).ok())?;

    let field = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let path = field(dto.filepath)?;

    Some(DownloadedItem {
        path: PathBuf::from(path),
        title: field(dto.title),
        uploader: field(dto.uploader),
    })
}

/// Look for an audio file in `dest_dir` produced by the output template.
fn find_download(dest_dir: &Path, id: &str) -> Option<DownloadedItem> {
    let marker = format!("[{}]", id);
    let entries = std::fs::read_dir(dest_dir).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .and_then(naming::split_extension)
                .is_some_and(|(stem, ext)| stem.ends_with(&marker) && naming::is_audio_extension(ext))
        })
        .collect();
    candidates.sort();

    candidates.into_iter().next().map(|path| DownloadedItem {
        path,
        title: None,
        uploader: None,
    })
}

/// Locate an executable by running it with a version flag.
fn query_version(binary: &str, flag: &str) -> Option<String> {
    std::process::Command::new(binary)
        .arg(flag)
        .stdin(Stdio::null())
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| {
            String::from_utf8_lossy(&o.stdout)
                .lines()
                .next()
                .map(|l| l.trim().to_string())
        })
}

/// yt-dlp version string, if the configured binary runs.
pub fn ytdlp_version(binary: &str) -> Option<String> {
    query_version(binary, "--version")
}

/// ffmpeg version line, if ffmpeg is on the PATH.
pub fn ffmpeg_version() -> Option<String> {
    query_version("ffmpeg", "-version")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn provider() -> YtDlpProvider {
        YtDlpProvider::new(&ProviderConfig {
            cookies_file: None,
            ..ProviderConfig::default()
        })
    }

    #[test]
    fn test_download_args_use_template_and_print() {
        let dir = tempdir().unwrap();
        let args = provider().download_args("aaaaaaaaaaa", dir.path());

        assert!(args.iter().any(|a| a.ends_with(OUTPUT_TEMPLATE)));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&PRINT_TEMPLATE.to_string()));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=aaaaaaaaaaa");
        assert!(!args.contains(&"--cookies".to_string()));
    }

    #[test]
    fn test_cookie_file_only_when_present() {
        let dir = tempdir().unwrap();
        let cookies = dir.path().join("cookies.txt");
        let config = ProviderConfig {
            cookies_file: Some(cookies.clone()),
            ..ProviderConfig::default()
        };

        assert!(YtDlpProvider::new(&config).cookie_args().is_empty());

        fs::write(&cookies, "# Netscape HTTP Cookie File").unwrap();
        let args = YtDlpProvider::new(&config).list_args("https://www.youtube.com/playlist?list=PL1");
        assert!(args.contains(&"--cookies".to_string()));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/playlist?list=PL1");
    }

    #[test]
    fn test_parse_print_output() {
        let out = r#"{"title": "Song A", "uploader": "Band", "filepath": "/music/Mix/Song A [aaaaaaaaaaa].webm"}"#;
        let item = parse_print_output(out).unwrap();
        assert_eq!(item.path, PathBuf::from("/music/Mix/Song A [aaaaaaaaaaa].webm"));
        assert_eq!(item.title.as_deref(), Some("Song A"));
        assert_eq!(item.uploader.as_deref(), Some("Band"));
    }

    #[test]
    fn test_parse_print_output_keeps_tabs_in_fields() {
        let out = "[debug] noise\n{\"title\": \"Live\\tTake\", \"uploader\": \"A\\tB\", \"filepath\": \"/x/Live\\tTake [aaaaaaaaaaa].m4a\"}\n";
        let item = parse_print_output(out).unwrap();
        assert_eq!(item.path, PathBuf::from("/x/Live\tTake [aaaaaaaaaaa].m4a"));
        assert_eq!(item.title.as_deref(), Some("Live\tTake"));
        assert_eq!(item.uploader.as_deref(), Some("A\tB"));
    }

    #[test]
    fn test_parse_print_output_missing_fields() {
        let item = parse_print_output(r#"{"title": "Song", "filepath": "/x/Song [aaaaaaaaaaa].m4a"}"#).unwrap();
        assert_eq!(item.uploader, None);
        assert!(parse_print_output("").is_none());
        assert!(parse_print_output("just a line").is_none());
        assert!(parse_print_output(r#"{"title": "Song", "filepath": null}"#).is_none());
    }

    #[test]
    fn test_debug_adds_verbose_flag() {
        let dir = tempdir().unwrap();
        let config = ProviderConfig {
            cookies_file: None,
            debug: true,
            ..ProviderConfig::default()
        };
        let provider = YtDlpProvider::new(&config);

        assert!(provider.download_args("aaaaaaaaaaa", dir.path()).contains(&"-v".to_string()));
        let list = provider.list_args("https://www.youtube.com/playlist?list=PL1");
        assert!(list.contains(&"-v".to_string()));
        assert!(!list.contains(&"--no-warnings".to_string()));
        assert!(!self::provider().download_args("aaaaaaaaaaa", dir.path()).contains(&"-v".to_string()));
    }

    #[tokio::test]
    async fn test_debug_log_is_appended() {
        let dir = tempdir().unwrap();
        let config = ProviderConfig {
            cookies_file: None,
            debug: true,
            ..ProviderConfig::default()
        };
        let provider = YtDlpProvider::new(&config);
        let args = vec!["--version".to_string()];

        provider.log_run(Some(dir.path()), &args, "exit status: 1", "ERROR: first").await;
        provider.log_run(Some(dir.path()), &args, "exit status: 0", "").await;
        self::provider().log_run(Some(dir.path()), &args, "exit status: 0", "quiet").await;

        let log = fs::read_to_string(dir.path().join(DEBUG_LOG_FILE)).unwrap();
        assert_eq!(log.matches("---- yt-dlp run:").count(), 2);
        assert!(log.contains("Command: yt-dlp --version"));
        assert!(log.contains("ERROR: first\n"));
        assert!(!log.contains("quiet"));
    }

    #[test]
    fn test_find_download_by_marker() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Song [aaaaaaaaaaa].webm.part"), b"x").unwrap();
        fs::write(dir.path().join("Song [aaaaaaaaaaa].webm"), b"x").unwrap();
        fs::write(dir.path().join("Other [bbbbbbbbbbb].m4a"), b"x").unwrap();

        let item = find_download(dir.path(), "aaaaaaaaaaa").unwrap();
        assert!(item.path.ends_with("Song [aaaaaaaaaaa].webm"));
        assert!(find_download(dir.path(), "ccccccccccc").is_none());
    }

    #[test]
    fn test_parse_playlist_json_error() {
        let err = parse_playlist_json("not json").unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_missing() {
        let config = ProviderConfig {
            binary: "definitely-not-a-real-yt-dlp-binary".to_string(),
            ..ProviderConfig::default()
        };
        let err = YtDlpProvider::new(&config)
            .list_playlist("https://www.youtube.com/playlist?list=PL1")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::ToolMissing);
    }
}
