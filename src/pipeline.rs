use std::sync::Arc;
use std::time::Instant;

use crate::artifact::{Artifact, ArtifactList, find_artifact};
use crate::cancel::CancellationToken;
use crate::dependency_resolver::{RESOLVED_DEPENDENCIES_ARTIFACT_ID, ResolvedDependencies};
use crate::error::Result;
use crate::registry::{ArtifactRegistry, ProcessorArtifactRegistry, with_registry_session};
use crate::unit::Unit;

/// Turns units into artifacts.
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, ctx: &CancellationToken, units: &[Unit]) -> Result<ArtifactList>;
}

/// Materializes artifacts, remembering what it produced in its registry namespace.
pub trait ArtifactProcessor: Send + Sync {
    fn name(&self) -> &str;

    fn process(
        &self,
        ctx: &CancellationToken,
        artifacts: &[Arc<dyn Artifact>],
        registry: &ProcessorArtifactRegistry,
    ) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub units: usize,
    pub artifacts: usize,
}

pub struct Pipeline {
    processors: Vec<Box<dyn Processor>>,
    artifact_processors: Vec<Box<dyn ArtifactProcessor>>,
    registry: Arc<dyn ArtifactRegistry>,
}

impl Pipeline {
    pub fn new(registry: Arc<dyn ArtifactRegistry>) -> Self {
        Self {
            processors: Vec::new(),
            artifact_processors: Vec::new(),
            registry,
        }
    }

    pub fn with_processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn with_artifact_processor(mut self, processor: impl ArtifactProcessor + 'static) -> Self {
        self.artifact_processors.push(Box::new(processor));
        self
    }

    /// Run every processor in order and collect their artifacts.
    ///
    /// Once a processor emits [`ResolvedDependencies`], the processors after
    /// it receive the units in resolved order.
    pub fn process_units(
        &self,
        ctx: &CancellationToken,
        units: Vec<Unit>,
    ) -> Result<(Vec<Unit>, ArtifactList)> {
        let mut units = units;
        let mut artifacts = ArtifactList::new();

        for processor in &self.processors {
            ctx.check()?;
            tracing::debug!("Running processor {}", processor.name());

            let produced = processor.process(ctx, &units)?;
            if let Some(resolved) = find_artifact::<ResolvedDependencies>(
                &produced,
                RESOLVED_DEPENDENCIES_ARTIFACT_ID,
            ) {
                units = resolved.units().to_vec();
            }
            artifacts.extend(produced);
        }

        Ok((units, artifacts))
    }

    /// Hand the artifacts to every artifact processor inside one registry session.
    pub fn process_artifacts(
        &self,
        ctx: &CancellationToken,
        artifacts: &[Arc<dyn Artifact>],
    ) -> Result<()> {
        with_registry_session(self.registry.as_ref(), || {
            for processor in &self.artifact_processors {
                ctx.check()?;
                tracing::debug!("Running artifact processor {}", processor.name());

                let scoped =
                    ProcessorArtifactRegistry::new(processor.name(), Arc::clone(&self.registry));
                processor.process(ctx, artifacts, &scoped)?;
            }
            Ok(())
        })
    }

    pub fn run(&self, ctx: &CancellationToken, units: Vec<Unit>) -> Result<RunSummary> {
        let start = Instant::now();
        ctx.check()?;

        let (units, artifacts) = self.process_units(ctx, units)?;
        self.process_artifacts(ctx, &artifacts)?;

        tracing::info!(
            status = "success",
            "Processed {} unit(s) into {} artifact(s) in {:.2}s",
            units.len(),
            artifacts.len(),
            start.elapsed().as_secs_f64()
        );

        Ok(RunSummary {
            units: units.len(),
            artifacts: artifacts.len(),
        })
    }
}
