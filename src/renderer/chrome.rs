//! Headless Chrome/Chromium/Edge renderer using the browser's `--print-to-pdf`

use super::{DocumentRenderer, RenderSource};
use crate::config::RendererConfig;
use crate::error::RenderError;
use crate::organizer;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Executable names tried on PATH, in order
const CANDIDATE_BINARIES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "msedge",
];

/// Longest stderr excerpt kept in a [`RenderError::Crashed`]
const STDERR_TAIL_CHARS: usize = 500;

/// Renderer that shells out to a Chromium-based browser
///
/// Every render is a fresh browser process, so a crash only costs one attempt. Output goes
/// to a hidden staging file that is checked for a PDF signature before it is renamed onto
/// the destination.
///
/// # Examples
///
/// ```no_run
/// use report_sync::renderer::{ChromeRenderer, DocumentRenderer, RenderSource};
/// use std::path::{Path, PathBuf};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // Explicit executable
/// let renderer = ChromeRenderer::new(PathBuf::from("/usr/bin/chromium"), Duration::from_secs(60));
///
/// // Or auto-discover
/// let renderer = ChromeRenderer::from_path(Duration::from_secs(60))
///     .expect("no browser found");
///
/// renderer
///     .render(&RenderSource::Html("<h1>Hi</h1>".into()), Path::new("out/hi.pdf"))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ChromeRenderer {
    executable: Option<PathBuf>,
    timeout: Duration,
}

impl ChromeRenderer {
    /// Create a renderer with an explicit executable
    pub fn new(executable: PathBuf, timeout: Duration) -> Self {
        Self {
            executable: Some(executable),
            timeout,
        }
    }

    /// Attempt to find a browser on PATH or in well-known install locations
    pub fn from_path(timeout: Duration) -> Option<Self> {
        Self::discover().map(|exe| Self::new(exe, timeout))
    }

    /// Build from configuration
    ///
    /// A configured executable that does not exist falls back to discovery (when enabled).
    /// If nothing is found the renderer is still constructed; [`check_available`] and
    /// [`render`] then report [`RenderError::EngineMissing`].
    ///
    /// [`check_available`]: DocumentRenderer::check_available
    /// [`render`]: DocumentRenderer::render
    pub fn from_config(config: &RendererConfig) -> Self {
        let configured = config.executable_path.as_ref().filter(|p| {
            let exists = p.is_file();
            if !exists {
                tracing::warn!(
                    path = %p.display(),
                    "Configured browser executable not found"
                );
            }
            exists
        });

        let executable = match configured {
            Some(path) => Some(path.clone()),
            None if config.search_path => Self::discover(),
            None => None,
        };

        match &executable {
            Some(path) => tracing::info!(path = %path.display(), "Using browser for PDF rendering"),
            None => tracing::warn!("No browser found for PDF rendering"),
        }

        Self {
            executable,
            timeout: config.timeout,
        }
    }

    /// Locate a Chromium-based browser
    ///
    /// Searches PATH with the `which` crate, then the usual install directories.
    pub fn discover() -> Option<PathBuf> {
        CANDIDATE_BINARIES
            .iter()
            .find_map(|name| which::which(name).ok())
            .or_else(|| well_known_locations().into_iter().find(|p| p.is_file()))
    }

    /// The executable that will be run, if any
    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    fn require_executable(&self) -> Result<&Path, RenderError> {
        self.executable.as_deref().ok_or_else(|| {
            RenderError::EngineMissing(
                "no Chrome, Chromium or Edge executable found; set renderer.executable_path"
                    .to_string(),
            )
        })
    }

    /// Run the browser once, printing `url` to `pdf_path`
    async fn print_to_pdf(&self, exe: &Path, url: &str, pdf_path: &Path) -> Result<(), RenderError> {
        let mut child = Command::new(exe)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--no-pdf-header-footer")
            .arg(format!("--print-to-pdf={}", pdf_path.display()))
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    RenderError::EngineMissing(format!(
                        "failed to start {}: {}",
                        exe.display(),
                        e
                    ))
                }
                _ => RenderError::Io(e),
            })?;

        let mut stderr = child.stderr.take();
        let run = async {
            let mut captured = Vec::new();
            if let Some(pipe) = stderr.as_mut() {
                // A browser that closes stderr early is not an error in itself
                if let Err(e) = pipe.read_to_end(&mut captured).await {
                    tracing::debug!(error = %e, "Could not read browser stderr");
                }
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, captured))
        };

        let (status, captured) = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                // Dropping the child kills the browser
                return Err(RenderError::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !status.success() {
            return Err(RenderError::Crashed {
                status: status.to_string(),
                stderr: stderr_tail(&captured),
            });
        }
        Ok(())
    }

    async fn render_inner(
        &self,
        exe: &Path,
        source: &RenderSource,
        destination: &Path,
        staging_pdf: &Path,
        staging_html: &Path,
    ) -> Result<(), RenderError> {
        let url = match source {
            RenderSource::Url(url) => url.clone(),
            RenderSource::Html(html) => {
                tokio::fs::write(staging_html, html.as_bytes()).await?;
                let absolute = tokio::fs::canonicalize(staging_html).await?;
                url::Url::from_file_path(&absolute)
                    .map_err(|()| {
                        RenderError::Io(std::io::Error::other(format!(
                            "cannot express {} as a file URL",
                            absolute.display()
                        )))
                    })?
                    .to_string()
            }
        };

        self.print_to_pdf(exe, &url, staging_pdf).await?;
        verify_pdf(staging_pdf).await?;
        organizer::commit_staged(staging_pdf, destination).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentRenderer for ChromeRenderer {
    async fn render(&self, source: &RenderSource, destination: &Path) -> Result<(), RenderError> {
        let exe = self.require_executable()?;
        organizer::ensure_parent(destination).await?;

        let staging_pdf = organizer::staging_path(destination);
        let staging_html = organizer::staging_path_with_extension(destination, "html");

        let result = self
            .render_inner(exe, source, destination, &staging_pdf, &staging_html)
            .await;

        organizer::discard_staged(&staging_html).await;
        if result.is_err() {
            organizer::discard_staged(&staging_pdf).await;
        }
        result
    }

    async fn check_available(&self) -> Result<(), RenderError> {
        let exe = self.require_executable()?;
        match tokio::fs::metadata(exe).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(RenderError::EngineMissing(format!(
                "{} is not a file",
                exe.display()
            ))),
            Err(e) => Err(RenderError::EngineMissing(format!(
                "{}: {}",
                exe.display(),
                e
            ))),
        }
    }

    fn name(&self) -> &str {
        "chrome-headless"
    }
}

/// Accept only a non-empty file starting with the PDF signature
async fn verify_pdf(path: &Path) -> Result<(), RenderError> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RenderError::InvalidOutput(
                "browser exited without writing a document".to_string(),
            ));
        }
        Err(e) => return Err(RenderError::Io(e)),
    };

    let mut magic = [0u8; 4];
    let mut read = 0;
    while read < magic.len() {
        let n = file.read(&mut magic[read..]).await?;
        if n == 0 {
            break;
        }
        read += n;
    }

    if read == 0 {
        return Err(RenderError::InvalidOutput("document is empty".to_string()));
    }
    if &magic[..read] != b"%PDF" {
        return Err(RenderError::InvalidOutput(
            "document does not start with a PDF header".to_string(),
        ));
    }
    Ok(())
}

pub(super) fn stderr_tail(captured: &[u8]) -> String {
    let text = String::from_utf8_lossy(captured);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL_CHARS {
        text.to_string()
    } else {
        text.chars().skip(count - STDERR_TAIL_CHARS).collect()
    }
}

fn well_known_locations() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        let roots = [
            std::env::var_os("ProgramFiles")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("C:/Program Files")),
            std::env::var_os("ProgramFiles(x86)")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("C:/Program Files (x86)")),
        ];
        for root in &roots {
            paths.push(root.join("Google/Chrome/Application/chrome.exe"));
            paths.push(root.join("Microsoft/Edge/Application/msedge.exe"));
        }
        if let Some(local) = std::env::var_os("LOCALAPPDATA") {
            paths.push(PathBuf::from(local).join("Google/Chrome/Application/chrome.exe"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        ));
        paths.push(PathBuf::from(
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ));
        paths.push(PathBuf::from(
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ));
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        paths.push(PathBuf::from("/usr/bin/google-chrome"));
        paths.push(PathBuf::from("/usr/bin/chromium"));
        paths.push(PathBuf::from("/usr/bin/chromium-browser"));
        paths.push(PathBuf::from("/snap/bin/chromium"));
        paths.push(PathBuf::from("/opt/google/chrome/chrome"));
    }

    paths
}
