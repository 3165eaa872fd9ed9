//! Deployment publisher: pushes task files and generated configuration to
//! the compute host over SSH/SFTP and restarts the serving process.
//!
//! The transport sits behind [`DeployChannel`] so the publishing rules
//! (path routing, artifact rendering, cleanup) can be tested without a
//! live host. The production channel wraps libssh2; its blocking calls
//! run on the blocking thread pool.

use std::fs::File;
use std::io::{self, Read};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::DeployConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::schema::DatabaseLocation;
use crate::types::{DeployTarget, DeploymentManifest, Endpoints};

/// Name of the generated database configuration artifact.
pub const DB_CONFIG_FILE: &str = "db_vals.txt";

/// SSH port on the compute target.
const SSH_PORT: u16 = 22;

/// Opens authenticated sessions to a deploy target.
#[async_trait]
pub trait DeployChannel: Send + Sync {
    /// Connect and authenticate as the given user.
    async fn connect(
        &self,
        target: &DeployTarget,
        user: &str,
    ) -> ProvisionResult<Box<dyn RemoteSession>>;
}

/// An authenticated session on the deploy target.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Copy a local file to the given remote path.
    async fn upload(&self, local: &Path, remote: &str) -> ProvisionResult<()>;

    /// Run a command on the target, returning its combined output.
    async fn exec(&self, command: &str) -> ProvisionResult<String>;
}

/// Production channel backed by libssh2.
#[derive(Debug, Default)]
pub struct Ssh2Channel;

impl Ssh2Channel {
    /// Create a new channel.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeployChannel for Ssh2Channel {
    async fn connect(
        &self,
        target: &DeployTarget,
        user: &str,
    ) -> ProvisionResult<Box<dyn RemoteSession>> {
        let host = target.host.clone();
        let key_path = target.key_path.clone();
        let user = user.to_owned();

        let session = run_blocking(&target.host, move || {
            let stream = TcpStream::connect((host.as_str(), SSH_PORT))?;
            let mut session = ssh2::Session::new()?;
            session.set_tcp_stream(stream);
            session.handshake()?;
            session.userauth_pubkey_file(&user, None, &key_path, None)?;
            Ok(session)
        })
        .await?;

        Ok(Box::new(Ssh2Session {
            host: target.host.clone(),
            session: Arc::new(Mutex::new(session)),
        }))
    }
}

struct Ssh2Session {
    host: String,
    session: Arc<Mutex<ssh2::Session>>,
}

impl Ssh2Session {
    fn lock(
        session: &Mutex<ssh2::Session>,
        host: &str,
    ) -> ProvisionResult<std::sync::MutexGuard<'_, ssh2::Session>> {
        session
            .lock()
            .map_err(|_| ProvisionError::provider(host, "ssh_session", "lock poisoned"))
    }
}

#[async_trait]
impl RemoteSession for Ssh2Session {
    async fn upload(&self, local: &Path, remote: &str) -> ProvisionResult<()> {
        let session = Arc::clone(&self.session);
        let host = self.host.clone();
        let local = local.to_path_buf();
        let remote = remote.to_owned();

        run_blocking(&self.host, move || {
            let session = Self::lock(&session, &host)?;
            let sftp = session.sftp()?;
            let mut source = File::open(&local)?;
            let mut destination = sftp.create(Path::new(&remote))?;
            io::copy(&mut source, &mut destination)?;
            Ok(())
        })
        .await
    }

    async fn exec(&self, command: &str) -> ProvisionResult<String> {
        let session = Arc::clone(&self.session);
        let host = self.host.clone();
        let command = command.to_owned();

        run_blocking(&self.host, move || {
            let session = Self::lock(&session, &host)?;
            let mut channel = session.channel_session()?;
            channel.exec(&command)?;
            let mut output = String::new();
            channel.read_to_string(&mut output)?;
            channel.wait_close()?;
            Ok(output)
        })
        .await
    }
}

async fn run_blocking<T, F>(host: &str, work: F) -> ProvisionResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ProvisionResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ProvisionError::provider(host, "ssh_worker", err.to_string()))?
}

/// Publishes the application to the compute host.
pub struct DeploymentPublisher {
    channel: Arc<dyn DeployChannel>,
    deploy: DeployConfig,
}

impl DeploymentPublisher {
    /// Create a new publisher.
    pub fn new(channel: Arc<dyn DeployChannel>, deploy: DeployConfig) -> Self {
        Self { channel, deploy }
    }

    /// Upload the manifest plus the generated database configuration,
    /// restart the serving process and return the resulting endpoints.
    ///
    /// Files whose source path mentions `html` land under the `html/`
    /// subdirectory of the application root; everything else lands in the
    /// root under its final path segment. With `clean_up` set, generated
    /// artifacts are removed locally after the upload.
    pub async fn publish(
        &self,
        target: &DeployTarget,
        manifest: &DeploymentManifest,
        database: &DatabaseLocation,
        clean_up: bool,
    ) -> ProvisionResult<Endpoints> {
        let artifact = self.render_db_config(database)?;

        let mut files: Vec<PathBuf> = manifest.task_files.clone();
        if let Some(listing_config) = &manifest.listing_config {
            files.push(listing_config.clone());
        }
        files.push(artifact.clone());

        info!(
            host = %target.host,
            files = files.len(),
            "publishing application to compute host"
        );

        let session = self
            .channel
            .connect(target, &self.deploy.remote_user)
            .await?;

        for file in &files {
            let destination = self.remote_destination(file)?;
            debug!(source = %file.display(), destination = %destination, "uploading file");
            session.upload(file, &destination).await?;
        }

        // Restart is fire-and-forget; the serving process reports no
        // useful exit status over this channel.
        let restart = format!(
            "cd {root} && . venv/bin/activate && sudo systemctl restart {service}",
            root = self.deploy.app_root,
            service = self.deploy.service,
        );
        let output = session.exec(&restart).await?;
        debug!(output = %output, "serving process restarted");

        if clean_up {
            std::fs::remove_file(&artifact)?;
            if let Some(listing_config) = &manifest.listing_config {
                std::fs::remove_file(listing_config)?;
            }
        }

        Ok(Endpoints::for_host(&target.host))
    }

    /// Render the key=value database configuration consumed by the
    /// server-side application.
    fn render_db_config(&self, database: &DatabaseLocation) -> ProvisionResult<PathBuf> {
        std::fs::create_dir_all(&self.deploy.artifact_dir)?;
        let path = self.deploy.artifact_dir.join(DB_CONFIG_FILE);

        let contents = format!(
            "frame_height = {frame_height}\n\
             db_host = '{host}'\n\
             db_name = '{name}'\n\
             db_username = '{username}'\n\
             db_password = '{password}'\n",
            frame_height = self.deploy.frame_height,
            host = database.host,
            name = database.database,
            username = database.credentials.username,
            password = database.credentials.password,
        );
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    fn remote_destination(&self, source: &Path) -> ProvisionResult<String> {
        let file_name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ProvisionError::Config(format!(
                    "deploy file has no usable name: {}",
                    source.display()
                ))
            })?;

        let root = self.deploy.app_root.trim_end_matches('/');
        if source.to_string_lossy().contains("html") {
            Ok(format!("{root}/html/{file_name}"))
        } else {
            Ok(format!("{root}/{file_name}"))
        }
    }
}

// =============================================================================
// Mock implementations for tests
// =============================================================================

#[derive(Debug, Default)]
struct MockChannelLog {
    connects: Vec<(String, String)>,
    uploads: Vec<(PathBuf, String)>,
    execs: Vec<String>,
}

/// Recording channel whose sessions log every upload and command.
#[derive(Debug, Default)]
pub struct MockChannel {
    log: Arc<Mutex<MockChannelLog>>,
}

impl MockChannel {
    /// Hosts and users connected to so far.
    pub fn connects(&self) -> Vec<(String, String)> {
        self.log.lock().map(|l| l.connects.clone()).unwrap_or_default()
    }

    /// Uploaded (source, destination) pairs in order.
    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.log.lock().map(|l| l.uploads.clone()).unwrap_or_default()
    }

    /// Commands executed in order.
    pub fn execs(&self) -> Vec<String> {
        self.log.lock().map(|l| l.execs.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DeployChannel for MockChannel {
    async fn connect(
        &self,
        target: &DeployTarget,
        user: &str,
    ) -> ProvisionResult<Box<dyn RemoteSession>> {
        if let Ok(mut log) = self.log.lock() {
            log.connects.push((target.host.clone(), user.to_owned()));
        }
        Ok(Box::new(MockSession {
            log: Arc::clone(&self.log),
        }))
    }
}

struct MockSession {
    log: Arc<Mutex<MockChannelLog>>,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn upload(&self, local: &Path, remote: &str) -> ProvisionResult<()> {
        if let Ok(mut log) = self.log.lock() {
            log.uploads.push((local.to_path_buf(), remote.to_owned()));
        }
        Ok(())
    }

    async fn exec(&self, command: &str) -> ProvisionResult<String> {
        if let Ok(mut log) = self.log.lock() {
            log.execs.push(command.to_owned());
        }
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DatabaseCredentials;

    fn test_location() -> DatabaseLocation {
        DatabaseLocation {
            host: "db.example.internal".to_owned(),
            port: 5432,
            database: "crowdlab_db_test".to_owned(),
            credentials: DatabaseCredentials {
                username: "crowdlab_user".to_owned(),
                password: "secret".to_owned(),
            },
        }
    }

    fn publisher_in(dir: &Path) -> (Arc<MockChannel>, DeploymentPublisher) {
        let channel = Arc::new(MockChannel::default());
        let deploy = DeployConfig {
            artifact_dir: dir.to_path_buf(),
            ..DeployConfig::default()
        };
        let publisher = DeploymentPublisher::new(
            Arc::clone(&channel) as Arc<dyn DeployChannel>,
            deploy,
        );
        (channel, publisher)
    }

    #[tokio::test]
    async fn ssh_channel_surfaces_unreachable_target() {
        let target = DeployTarget::new("host.invalid", PathBuf::from("/nonexistent/key.pem"));
        let result = Ssh2Channel::new().connect(&target, "ubuntu").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn html_files_route_to_html_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let task_file = dir.path().join("html").join("cover_page.html");
        std::fs::create_dir_all(task_file.parent().unwrap()).unwrap();
        std::fs::write(&task_file, "<html></html>").unwrap();
        let script = dir.path().join("handler.py");
        std::fs::write(&script, "pass").unwrap();

        let (channel, publisher) = publisher_in(dir.path());
        let target = DeployTarget::new("app.example.com", dir.path().join("key.pem"));
        let manifest = DeploymentManifest::new(vec![task_file, script]);

        let endpoints = publisher
            .publish(&target, &manifest, &test_location(), false)
            .await
            .unwrap();
        assert_eq!(endpoints.html_url, "https://app.example.com/html");
        assert_eq!(endpoints.json_url, "https://app.example.com/json");

        let destinations: Vec<String> =
            channel.uploads().into_iter().map(|(_, dest)| dest).collect();
        assert!(destinations.contains(&"/var/www/crowdlab/html/cover_page.html".to_owned()));
        assert!(destinations.contains(&"/var/www/crowdlab/handler.py".to_owned()));
    }

    #[tokio::test]
    async fn database_config_is_rendered_and_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, publisher) = publisher_in(dir.path());
        let target = DeployTarget::new("app.example.com", dir.path().join("key.pem"));
        let manifest = DeploymentManifest::new(Vec::new());

        publisher
            .publish(&target, &manifest, &test_location(), false)
            .await
            .unwrap();

        let artifact = dir.path().join(DB_CONFIG_FILE);
        let contents = std::fs::read_to_string(&artifact).unwrap();
        assert!(contents.contains("frame_height = 650"));
        assert!(contents.contains("db_host = 'db.example.internal'"));
        assert!(contents.contains("db_name = 'crowdlab_db_test'"));
        assert!(contents.contains("db_username = 'crowdlab_user'"));
        assert!(contents.contains("db_password = 'secret'"));

        let uploads = channel.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1, format!("/var/www/crowdlab/{DB_CONFIG_FILE}"));
    }

    #[tokio::test]
    async fn restart_runs_inside_virtualenv() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, publisher) = publisher_in(dir.path());
        let target = DeployTarget::new("app.example.com", dir.path().join("key.pem"));

        publisher
            .publish(&target, &DeploymentManifest::new(Vec::new()), &test_location(), false)
            .await
            .unwrap();

        let execs = channel.execs();
        assert_eq!(execs.len(), 1);
        assert_eq!(
            execs[0],
            "cd /var/www/crowdlab && . venv/bin/activate && sudo systemctl restart uwsgi"
        );
        assert_eq!(
            channel.connects(),
            vec![("app.example.com".to_owned(), "ubuntu".to_owned())]
        );
    }

    #[tokio::test]
    async fn clean_up_removes_generated_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let listing = dir.path().join("listing_config.json");
        std::fs::write(&listing, "{}").unwrap();

        let (_, publisher) = publisher_in(dir.path());
        let target = DeployTarget::new("app.example.com", dir.path().join("key.pem"));
        let manifest = DeploymentManifest::new(Vec::new()).with_listing_config(&listing);

        publisher
            .publish(&target, &manifest, &test_location(), true)
            .await
            .unwrap();

        assert!(!dir.path().join(DB_CONFIG_FILE).exists());
        assert!(!listing.exists());
    }
}
