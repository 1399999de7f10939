//! Management of the MaRCoS server on the Red Pitaya.
//!
//! The Red Pitaya is reached over SSH. Before the first experiment its FPGA
//! is flashed with the MaRCoS bitstream ([`Server::flash_fpga`]), the
//! server is built from source ([`Server::setup`]) and started
//! ([`Server::start`]). Bitstreams and sources are downloaded from pinned
//! GitHub revisions and copied to the board.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::config::Config;
use crate::error::{HwError, Result};

/// Revision of `marcos_extras` the FPGA bitstreams are taken from.
pub const MARCOS_EXTRAS_URL: &str =
    "https://github.com/vnegnev/marcos_extras/raw/77df0e4a33cec07eb751f0b1947a6aead99e8478";

/// Sources of the MaRCoS server.
pub const MARCOS_SERVER_URL: &str =
    "https://github.com/vnegnev/marcos_server/archive/refs/heads/master.zip";

/// File present on standard Red Pitaya OS images but not on Ocra images.
const RED_PITAYA_VERSION_FILE: &str = "/opt/redpitaya/version.txt";
const OVERLAY_DIR: &str = "/sys/kernel/config/device-tree/overlays/full";
const BUILD_DIR: &str = "/tmp/marcos_server-master/build";

const SSH_CONNECT_TIMEOUT_S: u64 = 5;

/// Result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status, `None` if the command was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// A shell on the remote host.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` and return its output whatever the exit status.
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Copy the local file `local` to `remote`.
    async fn upload(&self, local: &Path, remote: &str) -> Result<()>;
}

/// [`RemoteShell`] using the system `ssh` and `scp` clients.
///
/// Authentication is left to the SSH agent or key configuration; password
/// prompts are disabled.
#[derive(Debug, Clone)]
pub struct SshShell {
    host: String,
    user: String,
}

impl SshShell {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn options() -> [String; 4] {
        [
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={SSH_CONNECT_TIMEOUT_S}"),
        ]
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        log::debug!("ssh {}: {command}", self.destination());
        let output = Command::new("ssh")
            .args(Self::options())
            .arg(self.destination())
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        log::debug!("scp {} -> {}:{remote}", local.display(), self.destination());
        let output = Command::new("scp")
            .args(Self::options())
            .arg(local)
            .arg(format!("{}:{remote}", self.destination()))
            .stdin(Stdio::null())
            .output()
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(HwError::Remote {
                command: format!("scp {remote}"),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// Source of the files installed on the board.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Download `url` into a temporary file.
    async fn fetch(&self, url: &str) -> Result<NamedTempFile>;
}

/// Downloads artifacts over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpArtifacts {
    http: Client,
}

impl HttpArtifacts {
    /// Create a new download client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("spectrometer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifacts {
    async fn fetch(&self, url: &str) -> Result<NamedTempFile> {
        log::info!("Downloading {url}");
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(HwError::Download {
                url: url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }
        let bytes = response.bytes().await?;
        let mut file = NamedTempFile::new()?;
        file.write_all(&bytes)?;
        file.flush()?;
        log::debug!("Downloaded {} bytes to {}", bytes.len(), file.path().display());
        Ok(file)
    }
}

/// The MaRCoS server on a Red Pitaya.
#[derive(Debug)]
pub struct Server<S = SshShell, A = HttpArtifacts> {
    shell: S,
    artifacts: A,
}

impl Server<SshShell, HttpArtifacts> {
    /// Manage the server at the address in `config` over SSH.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            SshShell::new(&config.server.ip_address, &config.server.ssh_user),
            HttpArtifacts::new()?,
        ))
    }
}

impl<S: RemoteShell, A: ArtifactSource> Server<S, A> {
    pub fn new(shell: S, artifacts: A) -> Self {
        Self { shell, artifacts }
    }

    /// Load the MaRCoS bitstream for `red_pitaya_model` into the FPGA.
    ///
    /// A running server is stopped first.
    pub async fn flash_fpga(&self, red_pitaya_model: &str) -> Result<()> {
        if self.is_running().await? {
            log::warn!("MaRCoS server is already running! Stopping server...");
            self.stop().await?;
        }

        let bitstream = format!("{MARCOS_EXTRAS_URL}/marcos_fpga_{red_pitaya_model}");
        if self.file_exists(RED_PITAYA_VERSION_FILE).await? {
            log::info!("Standard Red Pitaya image, flashing via /dev/xdevcfg");
            self.transfer(&format!("{bitstream}.bit"), "/tmp/marcos_fpga.bit")
                .await?;
            self.run_checked("cat /tmp/marcos_fpga.bit > /dev/xdevcfg")
                .await?;
            self.run_checked("rm /tmp/marcos_fpga.bit").await?;
        } else {
            log::info!("Ocra image, loading a device tree overlay");
            self.transfer(
                &format!("{bitstream}.bit.bin"),
                "/lib/firmware/marcos_fpga.bit.bin",
            )
            .await?;
            self.transfer(&format!("{bitstream}.dtbo"), "/lib/firmware/marcos_fpga.dtbo")
                .await?;
            if self.dir_exists(OVERLAY_DIR).await? {
                self.run_checked(&format!("rmdir {OVERLAY_DIR}")).await?;
            }
            self.run_checked("echo 0 > /sys/class/fpga_manager/fpga0/flags")
                .await?;
            self.run_checked(&format!("mkdir {OVERLAY_DIR}")).await?;
            self.run_checked(&format!("echo -n 'marcos_fpga.dtbo' > {OVERLAY_DIR}/path"))
                .await?;
        }
        log::info!("FPGA flashed");
        Ok(())
    }

    /// Build the MaRCoS server from source on the board.
    ///
    /// The board clock is set to the local UTC time first; the Red Pitaya
    /// has no real-time clock and `make` refuses to build from sources
    /// dated in the future.
    pub async fn setup(&self) -> Result<()> {
        if self.is_running().await? {
            log::warn!("MaRCoS server is already running! Stopping server...");
            self.stop().await?;
        }

        let now = Utc::now().format("%Y-%m-%dT%H:%M:%S,%f%:z");
        self.run_checked(&format!("date -Ins -s '{now}'")).await?;

        self.transfer(MARCOS_SERVER_URL, "/tmp/marcos_server.zip")
            .await?;
        self.run_checked("cd /tmp && unzip -o marcos_server.zip")
            .await?;
        self.run_checked(&format!("mkdir -p {BUILD_DIR}")).await?;
        self.run_checked(&format!("cd {BUILD_DIR} && cmake ../src"))
            .await?;
        self.run_checked(&format!("cd {BUILD_DIR} && make -j2"))
            .await?;
        self.run_checked(&format!("cd {BUILD_DIR} && cp marcos_server ~/"))
            .await?;
        log::info!("MaRCoS server built");
        Ok(())
    }

    /// Start the server, restarting it if it already runs.
    pub async fn start(&self) -> Result<()> {
        if self.is_running().await? {
            log::warn!("MaRCoS server is already running! Restarting...");
            self.stop().await?;
        }
        self.run_checked("nohup ./marcos_server &>./marcos_server.log </dev/null &")
            .await?;
        log::info!("Server started");
        Ok(())
    }

    /// Stop the server.
    pub async fn stop(&self) -> Result<()> {
        if self.is_running().await? {
            self.run_checked("pkill marcos_server").await?;
            log::info!("Server stopped");
        } else {
            log::warn!("Server is not running! Skipping...");
        }
        Ok(())
    }

    pub async fn is_running(&self) -> Result<bool> {
        let output = self.shell.run("pgrep marcos").await?;
        Ok(!output.stdout.trim().is_empty())
    }

    async fn run_checked(&self, command: &str) -> Result<CommandOutput> {
        let output = self.shell.run(command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(HwError::Remote {
                command: command.to_string(),
                status: output.status,
                stderr: output.stderr,
            })
        }
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.shell.run(&format!("[ -f {path} ]")).await?.success())
    }

    async fn dir_exists(&self, path: &str) -> Result<bool> {
        Ok(self.shell.run(&format!("[ -d {path} ]")).await?.success())
    }

    async fn transfer(&self, url: &str, remote: &str) -> Result<()> {
        let file = self.artifacts.fetch(url).await?;
        self.shell.upload(file.path(), remote).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records commands and answers them from a fixed set of rules.
    #[derive(Debug, Default)]
    pub(crate) struct FakeShell {
        pub log: Mutex<Vec<String>>,
        pub running: Mutex<bool>,
        pub files: Vec<String>,
        pub dirs: Vec<String>,
        pub failing: Option<String>,
    }

    #[async_trait]
    impl RemoteShell for FakeShell {
        async fn run(&self, command: &str) -> Result<CommandOutput> {
            self.log.lock().unwrap().push(command.to_string());
            let ok = |stdout: &str| CommandOutput {
                status: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            };
            let failed = CommandOutput {
                status: Some(1),
                ..CommandOutput::default()
            };
            if self.failing.as_deref() == Some(command) {
                return Ok(CommandOutput {
                    stderr: "boom".to_string(),
                    ..failed
                });
            }
            let mut running = self.running.lock().unwrap();
            Ok(match command {
                "pgrep marcos" if *running => ok("1234\n"),
                "pgrep marcos" => failed,
                "pkill marcos_server" => {
                    *running = false;
                    ok("")
                }
                c if c.starts_with("nohup ./marcos_server") => {
                    *running = true;
                    ok("")
                }
                c if c.starts_with("[ -f ") => {
                    if self.files.iter().any(|f| c.contains(f.as_str())) {
                        ok("")
                    } else {
                        failed
                    }
                }
                c if c.starts_with("[ -d ") => {
                    if self.dirs.iter().any(|d| c.contains(d.as_str())) {
                        ok("")
                    } else {
                        failed
                    }
                }
                _ => ok(""),
            })
        }

        async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
            let content = std::fs::read_to_string(local).unwrap();
            self.log
                .lock()
                .unwrap()
                .push(format!("upload {content} -> {remote}"));
            Ok(())
        }
    }

    /// Serves the URL itself as file content.
    #[derive(Debug, Default)]
    pub(crate) struct FakeArtifacts;

    #[async_trait]
    impl ArtifactSource for FakeArtifacts {
        async fn fetch(&self, url: &str) -> Result<NamedTempFile> {
            let mut file = NamedTempFile::new()?;
            file.write_all(url.as_bytes())?;
            Ok(file)
        }
    }

    fn commands(server: &Server<FakeShell, FakeArtifacts>) -> Vec<String> {
        server.shell.log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_flash_standard_image() {
        let shell = FakeShell {
            files: vec![RED_PITAYA_VERSION_FILE.to_string()],
            ..FakeShell::default()
        };
        let server = Server::new(shell, FakeArtifacts);
        server.flash_fpga("rp-122").await.unwrap();

        let log = commands(&server);
        assert_eq!(
            log[2],
            format!("upload {MARCOS_EXTRAS_URL}/marcos_fpga_rp-122.bit -> /tmp/marcos_fpga.bit")
        );
        assert_eq!(log[3], "cat /tmp/marcos_fpga.bit > /dev/xdevcfg");
        assert_eq!(log[4], "rm /tmp/marcos_fpga.bit");
        assert_eq!(log.len(), 5);
    }

    #[tokio::test]
    async fn test_flash_ocra_image_resets_overlay() {
        let shell = FakeShell {
            dirs: vec![OVERLAY_DIR.to_string()],
            running: Mutex::new(true),
            ..FakeShell::default()
        };
        let server = Server::new(shell, FakeArtifacts);
        server.flash_fpga("rp-125").await.unwrap();

        let log = commands(&server);
        assert!(log.contains(&"pkill marcos_server".to_string()));
        assert!(log.contains(&format!(
            "upload {MARCOS_EXTRAS_URL}/marcos_fpga_rp-125.dtbo -> /lib/firmware/marcos_fpga.dtbo"
        )));
        let tail: Vec<&str> = log.iter().rev().take(4).rev().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "rmdir /sys/kernel/config/device-tree/overlays/full",
                "echo 0 > /sys/class/fpga_manager/fpga0/flags",
                "mkdir /sys/kernel/config/device-tree/overlays/full",
                "echo -n 'marcos_fpga.dtbo' > /sys/kernel/config/device-tree/overlays/full/path",
            ]
        );
    }

    #[tokio::test]
    async fn test_setup_builds_server() {
        let server = Server::new(FakeShell::default(), FakeArtifacts);
        server.setup().await.unwrap();

        let log = commands(&server);
        assert!(log[1].starts_with("date -Ins -s '"));
        assert!(log[1].ends_with("+00:00'"));
        assert_eq!(
            log[2],
            format!("upload {MARCOS_SERVER_URL} -> /tmp/marcos_server.zip")
        );
        assert_eq!(
            log.last().unwrap(),
            "cd /tmp/marcos_server-master/build && cp marcos_server ~/"
        );
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let server = Server::new(FakeShell::default(), FakeArtifacts);
        assert!(!server.is_running().await.unwrap());
        server.start().await.unwrap();
        assert!(server.is_running().await.unwrap());
        server.start().await.unwrap();
        server.stop().await.unwrap();
        assert!(!server.is_running().await.unwrap());
        server.stop().await.unwrap();

        let pkills = commands(&server)
            .iter()
            .filter(|c| c.as_str() == "pkill marcos_server")
            .count();
        assert_eq!(pkills, 2);
    }

    #[tokio::test]
    async fn test_failing_command_is_reported() {
        let shell = FakeShell {
            failing: Some("cd /tmp/marcos_server-master/build && make -j2".to_string()),
            ..FakeShell::default()
        };
        let server = Server::new(shell, FakeArtifacts);
        match server.setup().await {
            Err(HwError::Remote { command, stderr, .. }) => {
                assert!(command.ends_with("make -j2"));
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }
}
