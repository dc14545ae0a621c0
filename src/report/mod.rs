//! Verdict artifacts
//!
//! Every completed cycle publishes two documents: a machine-readable JSON
//! verdict and a self-contained HTML report. Both are staged to temporary
//! files in the target directory and renamed into place, so a reader only
//! ever sees a complete previous or complete new document.

mod narrative;

pub use narrative::{render_html, render_text};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ArtifactConfig;
use crate::drift::DatasetVerdict;
use crate::error::{AegisError, Result};

/// Version of the artifact layout; later versions only add fields
pub const SCHEMA_VERSION: u32 = 1;

/// The published verdict with its provenance envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictArtifact {
    pub schema_version: u32,
    pub cycle_id: Uuid,
    /// Wall-clock time the artifact was produced
    pub generated_at: DateTime<Utc>,
    /// SHA-256 of the reference baseline the window was compared against
    pub reference_digest: String,
    /// Capture time of the oldest and newest record in the window
    #[serde(default)]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub window_end: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub verdict: DatasetVerdict,
}

impl VerdictArtifact {
    pub fn new(cycle_id: Uuid, reference_digest: &str, verdict: DatasetVerdict) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            cycle_id,
            generated_at: Utc::now(),
            reference_digest: reference_digest.to_string(),
            window_start: None,
            window_end: None,
            verdict,
        }
    }

    pub fn with_window_range(mut self, range: Option<(DateTime<Utc>, DateTime<Utc>)>) -> Self {
        if let Some((start, end)) = range {
            self.window_start = Some(start);
            self.window_end = Some(end);
        }
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Paths written by one successful publish
#[derive(Debug, Clone)]
pub struct PublishedArtifacts {
    pub json: PathBuf,
    pub html: PathBuf,
    pub history: Option<PathBuf>,
}

/// Publishes the latest verdict artifacts
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
    json_name: String,
    html_name: String,
    history: usize,
}

impl ArtifactWriter {
    pub fn new(config: &ArtifactConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            json_name: config.json_name.clone(),
            html_name: config.html_name.clone(),
            history: config.history,
        }
    }

    pub fn json_path(&self) -> PathBuf {
        self.dir.join(&self.json_name)
    }

    pub fn html_path(&self) -> PathBuf {
        self.dir.join(&self.html_name)
    }

    pub fn history_dir(&self) -> PathBuf {
        self.dir.join("history")
    }

    /// Replace the latest JSON and HTML artifacts.
    ///
    /// Both documents are rendered and staged before either is renamed into
    /// place. On failure the previous artifacts stay authoritative and no
    /// temporary file is left behind.
    pub fn publish(&self, artifact: &VerdictArtifact) -> Result<PublishedArtifacts> {
        self.publish_with(artifact, &CommitToken::new())
    }

    /// Like [`publish`](Self::publish), but nothing is renamed into place
    /// unless `token` is still open once both documents are staged.
    pub fn publish_with(&self, artifact: &VerdictArtifact, token: &CommitToken) -> Result<PublishedArtifacts> {
        let json = artifact
            .to_json()
            .map_err(|e| AegisError::ArtifactWrite(format!("cannot serialize verdict: {}", e)))?;
        let html = render_html(artifact);

        fs::create_dir_all(&self.dir).map_err(|e| write_error("create", &self.dir, e))?;

        let staged_html = stage(&self.dir, &self.html_name, html.as_bytes())?;
        let staged_json = match stage(&self.dir, &self.json_name, &json) {
            Ok(path) => path,
            Err(err) => {
                discard(&staged_html);
                return Err(err);
            }
        };

        if !token.try_commit() {
            discard(&staged_html);
            discard(&staged_json);
            return Err(AegisError::ArtifactWrite(format!(
                "publish of cycle {} cancelled before commit",
                artifact.cycle_id
            )));
        }

        // The narrative goes first so the JSON never points at a missing report
        let json_path = self.json_path();
        let html_path = self.html_path();
        let previous_html = match keep_previous(&self.dir, &self.html_name, &html_path) {
            Ok(previous) => previous,
            Err(err) => {
                discard(&staged_html);
                discard(&staged_json);
                return Err(err);
            }
        };
        if let Err(err) = commit(&staged_html, &html_path) {
            discard(&staged_json);
            if let Some(previous) = &previous_html {
                discard(previous);
            }
            return Err(err);
        }
        if let Err(err) = commit(&staged_json, &json_path) {
            restore_previous(previous_html.as_deref(), &html_path);
            return Err(err);
        }
        if let Some(previous) = &previous_html {
            discard(previous);
        }
        sync_dir(&self.dir);

        let history = if self.history > 0 {
            match self.write_history(artifact, &json) {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!(error = %err, "Failed to record verdict history");
                    None
                }
            }
        } else {
            None
        };

        debug!(json = %json_path.display(), html = %html_path.display(), "Published verdict artifacts");
        Ok(PublishedArtifacts {
            json: json_path,
            html: html_path,
            history,
        })
    }

    fn write_history(&self, artifact: &VerdictArtifact, json: &[u8]) -> Result<PathBuf> {
        let dir = self.history_dir();
        fs::create_dir_all(&dir).map_err(|e| write_error("create", &dir, e))?;

        let name = format!(
            "verdict_{}_{}.json",
            artifact.generated_at.format("%Y%m%dT%H%M%S%3fZ"),
            &artifact.cycle_id.simple().to_string()[..8]
        );
        let path = dir.join(&name);
        let staged = stage(&dir, &name, json)?;
        commit(&staged, &path)?;

        self.prune_history(&dir)?;
        Ok(path)
    }

    /// Keep only the newest `history` entries; names sort chronologically
    fn prune_history(&self, dir: &Path) -> Result<()> {
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| write_error("list", dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with("verdict_") && n.ends_with(".json"))
            })
            .collect();
        entries.sort();

        let excess = entries.len().saturating_sub(self.history);
        for path in entries.into_iter().take(excess) {
            fs::remove_file(&path).map_err(|e| write_error("prune", &path, e))?;
        }
        Ok(())
    }
}

fn write_error(action: &str, path: &Path, err: std::io::Error) -> AegisError {
    AegisError::ArtifactWrite(format!("cannot {} {}: {}", action, path.display(), err))
}

/// Write `bytes` to a uniquely named hidden file next to the target and flush it to disk
fn stage(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));
    let result = File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    match result {
        Ok(()) => Ok(tmp),
        Err(err) => {
            discard(&tmp);
            Err(write_error("write", &tmp, err))
        }
    }
}

fn commit(staged: &Path, target: &Path) -> Result<()> {
    fs::rename(staged, target).map_err(|err| {
        discard(staged);
        write_error("publish", target, err)
    })
}

/// Link (or copy) the current target aside so a failed publish can put it back
fn keep_previous(dir: &Path, name: &str, target: &Path) -> Result<Option<PathBuf>> {
    if !target.is_file() {
        return Ok(None);
    }
    let backup = dir.join(format!(".{}.{}.prev.tmp", name, Uuid::new_v4().simple()));
    match fs::hard_link(target, &backup).or_else(|_| fs::copy(target, &backup).map(|_| ())) {
        Ok(()) => Ok(Some(backup)),
        Err(err) => {
            discard(&backup);
            Err(write_error("back up", target, err))
        }
    }
}

fn restore_previous(previous: Option<&Path>, target: &Path) {
    let restored = match previous {
        Some(previous) => fs::rename(previous, target),
        None => fs::remove_file(target),
    };
    if let Err(err) = restored {
        warn!(path = %target.display(), error = %err, "Failed to roll back report");
        if let Some(previous) = previous {
            discard(previous);
        }
    }
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "Failed to remove staged artifact");
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %err, "Directory sync skipped");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitState {
    Open,
    Committed,
    Cancelled,
}

/// One-shot decision between a publish reaching its commit point and a
/// caller giving up on it. Whichever happens first wins.
#[derive(Debug)]
pub struct CommitToken {
    state: Mutex<CommitState>,
}

impl CommitToken {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CommitState::Open),
        }
    }

    /// Claim the commit. False once the token was cancelled.
    pub fn try_commit(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            CommitState::Open => {
                *state = CommitState::Committed;
                true
            }
            CommitState::Committed => true,
            CommitState::Cancelled => false,
        }
    }

    /// Withdraw permission to commit. False if the publish already committed.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            CommitState::Open => {
                *state = CommitState::Cancelled;
                true
            }
            CommitState::Cancelled => true,
            CommitState::Committed => false,
        }
    }
}

impl Default for CommitToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the latest artifact can be trusted as current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    /// No cycle has published yet
    Missing,
    Fresh,
    /// Older than the staleness bound, typically after repeated failed cycles
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactStatus {
    pub state: ArtifactState,
    pub generated_at: Option<DateTime<Utc>>,
    pub age_secs: Option<i64>,
    pub cycle_id: Option<Uuid>,
    pub dataset_drifted: Option<bool>,
    pub drift_share: Option<f64>,
}

impl ArtifactStatus {
    fn missing() -> Self {
        Self {
            state: ArtifactState::Missing,
            generated_at: None,
            age_secs: None,
            cycle_id: None,
            dataset_drifted: None,
            drift_share: None,
        }
    }
}

/// Reads the published artifacts, as a dashboard would
#[derive(Debug, Clone)]
pub struct ArtifactReader {
    json_path: PathBuf,
    html_path: PathBuf,
}

impl ArtifactReader {
    pub fn new(config: &ArtifactConfig) -> Self {
        Self {
            json_path: config.dir.join(&config.json_name),
            html_path: config.dir.join(&config.html_name),
        }
    }

    pub fn json_path(&self) -> &Path {
        &self.json_path
    }

    /// The latest verdict, or `None` before the first successful cycle
    pub fn latest(&self) -> Result<Option<VerdictArtifact>> {
        match fs::read(&self.json_path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn html(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.html_path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Classify the latest artifact by its embedded generation time
    pub fn status(&self, now: DateTime<Utc>, stale_after: Duration) -> Result<ArtifactStatus> {
        let Some(artifact) = self.latest()? else {
            return Ok(ArtifactStatus::missing());
        };

        let age = now.signed_duration_since(artifact.generated_at);
        let stale_after = chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let state = if age > stale_after {
            ArtifactState::Stale
        } else {
            ArtifactState::Fresh
        };

        Ok(ArtifactStatus {
            state,
            generated_at: Some(artifact.generated_at),
            age_secs: Some(age.num_seconds()),
            cycle_id: Some(artifact.cycle_id),
            dataset_drifted: Some(artifact.verdict.dataset_drifted),
            drift_share: Some(artifact.verdict.drift_share),
        })
    }
}
