//! The detection pipeline behind every cycle
//!
//! `MonitorEngine` owns every handle a cycle needs: the validated schema,
//! the immutable reference, the window selector, the detector and the
//! artifact writer. The store is reached only through the opener, so each
//! cycle works on its own short-lived handle.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::drift::{DatasetVerdict, DriftDetector};
use crate::error::{AegisError, Result};
use crate::reference::ReferenceBaseline;
use crate::report::{ArtifactWriter, CommitToken, PublishedArtifacts, VerdictArtifact};
use crate::schema::SchemaMap;
use crate::store::StoreOpener;
use crate::window::{Window, WindowSelector};

pub struct MonitorEngine {
    config: MonitorConfig,
    opener: Arc<dyn StoreOpener>,
    schema: SchemaMap,
    reference: ReferenceBaseline,
    selector: WindowSelector,
    detector: DriftDetector,
    writer: ArtifactWriter,
}

impl MonitorEngine {
    /// Validate the configuration, load the reference CSV and check the
    /// mapping against both sources. Any mismatch refuses startup.
    pub fn bootstrap(config: MonitorConfig, opener: Arc<dyn StoreOpener>) -> Result<Self> {
        config.validate()?;
        let schema = SchemaMap::new(
            config.schema.clone(),
            &config.store.timestamp_column,
            &config.store.ignored_columns,
        )?;
        let reference = ReferenceBaseline::from_csv(&config.reference.path, &schema)?;
        Self::with_reference(config, opener, reference)
    }

    /// Same checks as [`bootstrap`](Self::bootstrap) with an already built reference
    pub fn with_reference(
        config: MonitorConfig,
        opener: Arc<dyn StoreOpener>,
        reference: ReferenceBaseline,
    ) -> Result<Self> {
        config.validate()?;
        let schema = SchemaMap::new(
            config.schema.clone(),
            &config.store.timestamp_column,
            &config.store.ignored_columns,
        )?;

        let store_columns = {
            let store = opener.open()?;
            store.columns()?
        };
        schema.validate_sources(&store_columns, reference.columns())?;

        if reference.features() != schema.monitored().as_slice() {
            return Err(AegisError::SchemaMismatch(
                "reference features do not follow the configured mapping".into(),
            ));
        }

        info!(
            store = %opener.describe(),
            features = reference.features().len(),
            reference_rows = reference.len(),
            window_capacity = config.window.capacity,
            min_window = config.window.min_size,
            "Schema mapping validated"
        );

        Ok(Self {
            selector: WindowSelector::new(config.window.capacity, config.window.min_size),
            detector: DriftDetector::new(config.detection.clone()),
            writer: ArtifactWriter::new(&config.artifacts),
            config,
            opener,
            schema,
            reference,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    pub fn reference(&self) -> &ReferenceBaseline {
        &self.reference
    }

    pub fn writer(&self) -> &ArtifactWriter {
        &self.writer
    }

    pub fn store_location(&self) -> String {
        self.opener.describe()
    }

    /// Open a store handle, select the window, release the handle
    pub fn read_window(&self) -> Result<Window> {
        let store = self.opener.open()?;
        self.selector.select(store.as_ref(), &self.schema)
    }

    pub fn detect(&self, window: &Window) -> Result<DatasetVerdict> {
        self.detector.detect(&self.reference, window)
    }

    /// Wrap a verdict in its provenance envelope
    pub fn build_artifact(&self, cycle_id: Uuid, window: &Window, verdict: DatasetVerdict) -> VerdictArtifact {
        VerdictArtifact::new(cycle_id, self.reference.digest(), verdict).with_window_range(window.time_range())
    }

    /// Publish unless `token` is cancelled before the commit point
    pub fn publish_with(&self, artifact: &VerdictArtifact, token: &CommitToken) -> Result<PublishedArtifacts> {
        self.writer.publish_with(artifact, token)
    }
}

impl std::fmt::Debug for MonitorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorEngine")
            .field("store", &self.opener.describe())
            .field("reference_rows", &self.reference.len())
            .field("reference_digest", &self.reference.digest())
            .finish()
    }
}
