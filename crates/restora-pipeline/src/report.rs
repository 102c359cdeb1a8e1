//! Dataset runs and their score bookkeeping.
//!
//! [`run_dataset`] drives one [`PipelineRequest`] per image and hands the
//! results to a [`ResultSink`]. A [`RunReport`] collects the per-image
//! score lines and the per-step samples as the run progresses, and is
//! returned at the end so the caller can print or persist the averages.

use std::collections::BTreeMap;

use crate::metrics::{self, AggregateReport, Evaluation, MetricError, MetricSample};
use crate::mode::Mode;
use crate::pipeline::{Orchestrator, PipelineRequest};
use crate::types::{DynamicImage, PipelineError, RestorationResult};

/// Receives the results of each image as the run progresses.
pub trait ResultSink {
    /// Error raised when a result cannot be persisted.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist the results for `item`.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn record(&mut self, item: &str, results: &[RestorationResult]) -> Result<(), Self::Error>;

    /// Called once after every item has been recorded.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn finish(&mut self, report: &RunReport) -> Result<(), Self::Error>;
}

/// One image of a dataset.
#[derive(Debug, Clone)]
pub struct DatasetItem {
    /// File name, extension included.
    pub name: String,
    /// Image to restore.
    pub image: DynamicImage,
    /// Ground truth, if the dataset has one for this image.
    pub reference: Option<DynamicImage>,
}

/// Scores gathered for one step position across the dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    /// Step index within the request.
    pub step: usize,
    /// Mode run at this step.
    pub mode: Mode,
    /// Output tag of the step.
    pub tag: String,
    /// Scored samples, in item order.
    pub samples: Vec<MetricSample>,
    /// Items whose output could not be scored, with the reason.
    pub skipped: Vec<(String, MetricError)>,
}

impl StepSummary {
    /// Averages over the scored samples.
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::EmptyDataset`] if nothing was scored.
    pub fn aggregate(&self) -> Result<AggregateReport, MetricError> {
        metrics::aggregate(&self.samples)
    }
}

/// Accumulated results of one named run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    run: String,
    items: usize,
    lines: Vec<String>,
    steps: BTreeMap<usize, StepSummary>,
}

impl RunReport {
    /// An empty report for the run called `run`.
    #[must_use]
    pub fn new(run: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            items: 0,
            lines: Vec::new(),
            steps: BTreeMap::new(),
        }
    }

    /// Name of the run.
    #[must_use]
    pub fn run(&self) -> &str {
        &self.run
    }

    /// Number of items recorded.
    #[must_use]
    pub const fn items(&self) -> usize {
        self.items
    }

    /// Record every step's outcome for `item`.
    pub fn record(&mut self, item: &str, results: &[RestorationResult]) {
        self.items += 1;
        for result in results {
            let label = if results.len() > 1 {
                format!("{item} ({})", result.tag)
            } else {
                item.to_owned()
            };
            let summary = self
                .steps
                .entry(result.step)
                .or_insert_with(|| StepSummary {
                    step: result.step,
                    mode: result.mode,
                    tag: result.tag.clone(),
                    samples: Vec::new(),
                    skipped: Vec::new(),
                });
            match &result.evaluation {
                Evaluation::NoReference => {}
                Evaluation::Scored(sample) => {
                    self.lines.push(format!(
                        "{label} - PSNR: {:.2} dB; SSIM: {:.4}.",
                        sample.psnr, sample.ssim
                    ));
                    summary.samples.push(*sample);
                }
                Evaluation::Skipped(err) => {
                    self.lines.push(format!("{label} - not scored: {err}."));
                    summary.skipped.push((item.to_owned(), err.clone()));
                }
            }
        }
    }

    /// Per-image lines, in recording order.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Per-step summaries, in step order.
    pub fn steps(&self) -> impl Iterator<Item = &StepSummary> {
        self.steps.values()
    }

    /// One average line per step that has at least one score.
    #[must_use]
    pub fn average_lines(&self) -> Vec<String> {
        self.steps()
            .filter_map(|summary| {
                let report = summary.aggregate().ok()?;
                Some(format!(
                    "Average PSNR/SSIM - {}_{} - PSNR: {:.2} dB; SSIM: {:.4}",
                    self.run, summary.tag, report.mean_psnr, report.mean_ssim
                ))
            })
            .collect()
    }
}

/// Run `template` over every item of a dataset.
///
/// Each item gets its own request, cloned from `template`, with the item
/// name set (which keys per-image seeds) and the item's reference
/// attached when it has one. Results are recorded in the returned report
/// and passed to `sink` as each image finishes.
///
/// # Errors
///
/// Returns the first [`PipelineError`] raised by the orchestrator, or
/// [`PipelineError::Sink`] if the sink fails. Items after the failure
/// are not processed. On a stage failure the steps that item completed
/// still reach the sink, and the sink is finished with the report so
/// far before the error is returned.
pub fn run_dataset<I, S>(
    orchestrator: &Orchestrator,
    template: &PipelineRequest,
    items: I,
    run: &str,
    sink: &mut S,
) -> Result<RunReport, PipelineError>
where
    I: IntoIterator<Item = DatasetItem>,
    S: ResultSink + ?Sized,
{
    let mut report = RunReport::new(run);
    for item in items {
        let mut request = template.clone().with_item(item.name.as_str());
        if item.reference.is_some() {
            request.reference = item.reference;
        }
        let results = match orchestrator.run(&request, &item.image) {
            Ok(results) => results,
            Err(PipelineError::Stage {
                step,
                mode,
                completed,
                source,
            }) => {
                if !completed.is_empty() {
                    report.record(&item.name, &completed);
                    sink.record(&item.name, &completed).map_err(sink_error)?;
                }
                log::warn!(
                    "{}: stopped at {} step {step}, writing partial results",
                    report.run,
                    item.name
                );
                finish(&report, sink)?;
                return Err(PipelineError::Stage {
                    step,
                    mode,
                    completed,
                    source,
                });
            }
            Err(err) => return Err(err),
        };
        report.record(&item.name, &results);
        sink.record(&item.name, &results).map_err(sink_error)?;
    }

    finish(&report, sink)?;
    Ok(report)
}

fn sink_error<E: std::error::Error + Send + Sync + 'static>(err: E) -> PipelineError {
    PipelineError::Sink(Box::new(err))
}

/// Log the step averages and hand the report to the sink.
fn finish<S: ResultSink + ?Sized>(report: &RunReport, sink: &mut S) -> Result<(), PipelineError> {
    for line in report.average_lines() {
        log::info!("{line}");
    }
    for summary in report.steps().filter(|s| !s.skipped.is_empty()) {
        log::warn!(
            "{}: {} item(s) not scored at step {} ({})",
            report.run,
            summary.skipped.len(),
            summary.step,
            summary.mode,
        );
    }
    sink.finish(report).map_err(sink_error)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::baseline::BaselineLoader;
    use crate::mode::ModeParams;
    use crate::pipeline::PipelineStep;
    use crate::registry::StageRegistry;
    use crate::stage::ModelLoader;
    use crate::types::{RgbImage, StageError};

    #[derive(Default)]
    struct Collect {
        items: Vec<(String, usize)>,
        finished: bool,
        lines: Vec<String>,
    }

    impl ResultSink for Collect {
        type Error = std::io::Error;

        fn record(&mut self, item: &str, results: &[RestorationResult]) -> Result<(), Self::Error> {
            self.items.push((item.to_owned(), results.len()));
            Ok(())
        }

        fn finish(&mut self, report: &RunReport) -> Result<(), Self::Error> {
            self.finished = true;
            self.lines = report.lines().to_vec();
            self.lines.extend(report.average_lines());
            Ok(())
        }
    }

    struct Refuse;

    impl ResultSink for Refuse {
        type Error = std::io::Error;

        fn record(&mut self, _item: &str, _results: &[RestorationResult]) -> Result<(), Self::Error> {
            Err(std::io::Error::other("disk full"))
        }

        fn finish(&mut self, _report: &RunReport) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    fn flat(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([v; 3])))
    }

    fn identity_orchestrator() -> (Orchestrator, PipelineRequest) {
        let loader: Arc<dyn ModelLoader> = Arc::new(BaselineLoader);
        let orchestrator = Orchestrator::new(StageRegistry::builtin(&loader));
        let mut params = ModeParams::default();
        params.models.insert(Mode::Deblocking, "identity".to_owned());
        let template =
            PipelineRequest::new(vec![PipelineStep::source(Mode::Deblocking)]).with_params(params);
        (orchestrator, template)
    }

    fn item(name: &str, image: DynamicImage, reference: Option<DynamicImage>) -> DatasetItem {
        DatasetItem {
            name: name.to_owned(),
            image,
            reference,
        }
    }

    #[test]
    fn dataset_run_scores_and_averages() {
        let (orchestrator, template) = identity_orchestrator();
        let items = vec![
            item("a.png", flat(16, 16, 100), Some(flat(16, 16, 100))),
            item("b.png", flat(16, 16, 100), Some(flat(16, 16, 101))),
            item("c.png", flat(16, 16, 100), None),
        ];
        let mut sink = Collect::default();
        let report = run_dataset(&orchestrator, &template, items, "demo", &mut sink).unwrap();

        assert_eq!(report.items(), 3);
        assert!(sink.finished);
        assert_eq!(sink.items.len(), 3);

        let summary = report.steps().next().unwrap();
        assert_eq!(summary.tag, "db_identity");
        assert_eq!(summary.samples.len(), 2);
        assert!(summary.samples[0].psnr.is_infinite());
        assert!((summary.samples[1].psnr - 48.13).abs() < 0.01);

        assert_eq!(report.lines().len(), 2);
        assert!(report.lines()[1].starts_with("b.png - PSNR: 48.13 dB; SSIM: "));
    }

    #[test]
    fn mismatched_reference_is_skipped_not_scored() {
        let (orchestrator, template) = identity_orchestrator();
        let items = vec![
            item("a.png", flat(16, 16, 50), Some(flat(16, 16, 51))),
            item("b.png", flat(16, 16, 50), Some(flat(20, 16, 50))),
        ];
        let report =
            run_dataset(&orchestrator, &template, items, "demo", &mut Collect::default()).unwrap();
        let summary = report.steps().next().unwrap();
        assert_eq!(summary.samples.len(), 1);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].0, "b.png");
        assert_eq!(report.average_lines().len(), 1);
        assert!(report.average_lines()[0].starts_with("Average PSNR/SSIM - demo_db_identity - PSNR: 48.13 dB"));
    }

    #[test]
    fn no_scores_means_no_average() {
        let report = RunReport::new("empty");
        assert!(report.average_lines().is_empty());
        assert_eq!(report.steps().count(), 0);
    }

    #[test]
    fn empty_step_summary_aggregate_fails() {
        let summary = StepSummary {
            step: 0,
            mode: Mode::Denoising,
            tag: "dn".to_owned(),
            samples: Vec::new(),
            skipped: Vec::new(),
        };
        assert_eq!(summary.aggregate(), Err(MetricError::EmptyDataset));
    }

    #[test]
    fn sink_failure_aborts_run() {
        let (orchestrator, template) = identity_orchestrator();
        let items = vec![item("a.png", flat(8, 8, 1), None)];
        let err = run_dataset(&orchestrator, &template, items, "demo", &mut Refuse).unwrap_err();
        assert!(matches!(err, PipelineError::Sink(_)));
    }

    #[test]
    fn stage_failure_stops_dataset() {
        let (orchestrator, mut template) = identity_orchestrator();
        template
            .params
            .models
            .insert(Mode::Deblocking, "ffdnet_color".to_owned());
        let items = vec![
            item("a.png", flat(8, 8, 1), None),
            item("b.png", flat(8, 8, 1), None),
        ];
        let mut sink = Collect::default();
        let err = run_dataset(&orchestrator, &template, items, "demo", &mut sink).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Stage {
                source: StageError::ModelLoad { .. },
                ..
            }
        ));
        assert!(sink.items.is_empty());
        assert!(sink.finished);
    }

    #[test]
    fn stage_failure_keeps_completed_steps_and_log() {
        let (orchestrator, mut template) = identity_orchestrator();
        template.steps.push(PipelineStep::chained(Mode::Denoising));
        template.params.denoising.model = "ffdnet_color".to_owned();
        let items = vec![
            item("a.png", flat(8, 8, 100), Some(flat(8, 8, 101))),
            item("b.png", flat(8, 8, 100), None),
        ];
        let mut sink = Collect::default();
        let err = run_dataset(&orchestrator, &template, items, "demo", &mut sink).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Stage {
                step: 1,
                mode: Mode::Denoising,
                ..
            }
        ));
        assert_eq!(sink.items, vec![("a.png".to_owned(), 1)]);
        assert!(sink.finished);
        assert_eq!(sink.lines.len(), 2);
        assert!(sink.lines[0].starts_with("a.png - PSNR:"));
        assert!(sink.lines[1].starts_with("Average PSNR/SSIM - demo_db_identity"));
    }
}
