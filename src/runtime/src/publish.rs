//! End-to-end publish pipeline.
//!
//! resolve base → walk + diff → synthesize → append → push.
//! Nothing is pushed unless both layers were built, and a round with no
//! changes stops before touching the registry again.

use std::path::PathBuf;

use kontext_core::error::{KontextError, Result};
use kontext_core::KontextConfig;

use crate::base::{BaseResolver, BaseState, Baseline};
use crate::context::{DiffEngine, DiffResult, LayerSynthesizer, SynthesizedLayers, TreeWalker};
use crate::oci::{ImageReference, ImageRegistry, LayerHistory, NewLayer, PushResult, RemoteImage};

/// Inputs for one publish.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Local context directory
    pub directory: PathBuf,
    /// Tag to publish to, also searched for a previous round
    pub target: ImageReference,
    /// Stop after building the layers
    pub dry_run: bool,
}

/// What changed in one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaSummary {
    pub base: BaseState,
    /// Files and directories written to the data layer
    pub included: usize,
    /// Baseline paths no longer present
    pub removed: usize,
    /// Whiteout markers written
    pub whiteouts: usize,
    /// Entries in the updated manifest
    pub manifest_entries: usize,
    /// Uncompressed data layer size (0 when nothing was built)
    pub data_layer_bytes: usize,
    /// Uncompressed manifest layer size (0 when nothing was built)
    pub manifest_layer_bytes: usize,
}

impl DeltaSummary {
    fn new(base: BaseState, diff: &DiffResult, layers: Option<&SynthesizedLayers>) -> Self {
        Self {
            base,
            included: diff.inclusions.len(),
            removed: diff.removed.len(),
            whiteouts: diff.whiteouts.len(),
            manifest_entries: diff.manifest.len(),
            data_layer_bytes: layers.map_or(0, |l| l.data.len()),
            manifest_layer_bytes: layers.map_or(0, |l| l.manifest.len()),
        }
    }

    /// Inclusions plus removals.
    pub fn changed(&self) -> usize {
        self.included + self.removed
    }
}

/// Result of [`publish`].
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    /// No changes against the baseline; nothing pushed.
    Unchanged(DeltaSummary),
    /// Layers built but not pushed.
    DryRun {
        summary: DeltaSummary,
        image: Box<RemoteImage>,
    },
    /// Image pushed to the target.
    Published {
        summary: DeltaSummary,
        push: PushResult,
    },
}

impl PublishOutcome {
    pub fn summary(&self) -> &DeltaSummary {
        match self {
            Self::Unchanged(summary) => summary,
            Self::DryRun { summary, .. } | Self::Published { summary, .. } => summary,
        }
    }
}

/// Publish `request.directory` to `request.target`.
pub async fn publish(
    config: &KontextConfig,
    registry: &dyn ImageRegistry,
    request: PublishRequest,
) -> Result<PublishOutcome> {
    if !request.directory.is_dir() {
        return Err(KontextError::Usage(format!(
            "Context directory {} does not exist or is not a directory",
            request.directory.display()
        )));
    }

    let Baseline {
        image: base_image,
        manifest: baseline,
        state: base_state,
    } = BaseResolver::new(config, registry).resolve(&request.target).await?;

    let mode = config.change_detection;
    let directory = request.directory.clone();
    let (diff, layers) = tokio::task::spawn_blocking(move || -> Result<_> {
        let walker = TreeWalker::new(directory);
        let diff = DiffEngine::new(mode).diff(walker.entries(), baseline)?;
        if diff.is_unchanged() {
            return Ok((diff, None));
        }
        let layers = LayerSynthesizer::default().synthesize(&diff)?;
        Ok((diff, Some(layers)))
    })
    .await
    .map_err(|e| KontextError::Other(format!("Diff task failed: {}", e)))??;

    let summary = DeltaSummary::new(base_state, &diff, layers.as_ref());
    tracing::info!(
        directory = %request.directory.display(),
        base = %base_state,
        mode = %mode,
        included = summary.included,
        removed = summary.removed,
        whiteouts = summary.whiteouts,
        "Computed context delta"
    );

    let layers = match layers {
        Some(layers) => layers,
        None => {
            tracing::info!(reference = %request.target, "Context unchanged, nothing to publish");
            return Ok(PublishOutcome::Unchanged(summary));
        }
    };

    let image = base_image.append_layers(vec![
        NewLayer {
            tar: layers.data,
            history: LayerHistory::new("kontext publish").with_comment("context data"),
        },
        NewLayer {
            tar: layers.manifest,
            history: LayerHistory::new("kontext publish").with_comment("context manifest"),
        },
    ])?;

    if request.dry_run {
        tracing::info!(reference = %request.target, "Dry run, skipping push");
        return Ok(PublishOutcome::DryRun {
            summary,
            image: Box::new(image),
        });
    }

    let push = registry.push(&request.target, &image).await?;
    tracing::info!(
        reference = %request.target,
        manifest_url = %push.manifest_url,
        "Published context image"
    );
    Ok(PublishOutcome::Published { summary, push })
}
