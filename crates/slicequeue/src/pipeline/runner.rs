use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, info_span, warn};

use crate::db::job_repo::{self, EstimateWrite, FailureRecorded, JobEstimate};
use crate::db::{material_repo, order_repo, Database};
use crate::error::FailureKind;
use crate::order::OrderStatus;
use crate::pricing::PricingPolicy;
use crate::report;
use crate::sanitize;
use crate::slicer::Slicer;
use crate::worker::job::JobResult;

use super::context::PipelineContext;
use super::error::PipelineError;

pub struct Pipeline {
    db: Database,
    slicer: Arc<dyn Slicer>,
    pricing: PricingPolicy,
}

impl Pipeline {
    pub fn new(db: Database, slicer: Arc<dyn Slicer>, pricing: PricingPolicy) -> Self {
        Self { db, slicer, pricing }
    }

    /// Run one attempt for a claimed queue entry.
    ///
    /// Successes and permanent failures are written back to the job (and
    /// order) before returning. Transient and invariant failures are only
    /// reported; the caller decides whether to retry.
    pub fn run(&self, mut ctx: PipelineContext) -> (JobResult, PipelineContext) {
        let path = Path::new(&ctx.task.file_path);
        let upload = sanitize::upload_label(path);
        let fingerprint = sanitize::path_fingerprint(path);
        let _pipeline_span = info_span!("pipeline",
            task_id = %ctx.task.id,
            attempt = ctx.task.attempts,
            upload = %upload,
            path_fp = %fingerprint,
        )
        .entered();

        match self.execute(&mut ctx) {
            Ok(result) => (result, ctx),
            Err(e) => {
                let result = self.handle_failure(&ctx, e);
                (result, ctx)
            }
        }
    }

    fn execute(&self, ctx: &mut PipelineContext) -> Result<JobResult, PipelineError> {
        // Step 1: Resolve job and material
        let (job, material) = {
            let _step = info_span!("resolve").entered();
            self.step_resolve(ctx)?
        };

        // Step 2: Mark the order as started
        {
            let _step = info_span!("start_order", order_id = job.order_id).entered();
            ctx.order_started =
                order_repo::transition(&self.db, job.order_id, OrderStatus::InProgress)?;
            if ctx.order_started {
                info!("Order {} in progress", job.order_id);
            }
        }

        // Step 3: Slice
        let output = {
            let _step = info_span!("slice").entered();
            let output = self.slicer.slice(Path::new(&ctx.task.file_path))?;
            ctx.output = Some(output.clone());
            output
        };

        // Step 4: Parse the report
        let estimate = {
            let _step = info_span!("parse_report").entered();
            let estimate = report::parse_report(&output.report)?;
            ctx.estimate = Some(estimate);
            estimate
        };

        // Step 5: Price
        let cost = {
            let _step = info_span!("estimate_cost").entered();
            let cost = self.pricing.price(&estimate, material.cost_per_gram);
            ctx.cost = Some(cost);
            cost
        };

        // Step 6: Persist
        let gcode_path = output.gcode_path.display().to_string();
        let estimated_time = i64::try_from(estimate.seconds).unwrap_or(i64::MAX);
        {
            let _step = info_span!("persist", print_job_id = job.id).entered();
            let written = job_repo::record_estimate(
                &self.db,
                job.id,
                &JobEstimate {
                    estimated_time,
                    estimated_cost: cost,
                    gcode_path: gcode_path.clone(),
                },
            )?;
            match written {
                EstimateWrite::Stored => {}
                EstimateWrite::JobMissing => {
                    return Err(PipelineError::JobNotFound(ctx.task.file_path.clone()));
                }
                EstimateWrite::Refused { order_id, status } => {
                    return Err(PipelineError::OrderClosed {
                        order_id,
                        print_job_id: job.id,
                        status,
                    });
                }
            }
        }

        info!(
            print_job_id = job.id,
            seconds = estimate.seconds,
            grams = estimate.grams,
            cost,
            "Job sliced"
        );

        Ok(JobResult::Sliced {
            print_job_id: job.id,
            gcode_path,
            estimated_time,
            estimated_cost: cost,
        })
    }

    fn step_resolve(
        &self,
        ctx: &mut PipelineContext,
    ) -> Result<(job_repo::PrintJobRow, material_repo::MaterialRow), PipelineError> {
        let path = &ctx.task.file_path;
        let job = job_repo::find_by_file_path(&self.db, path)?
            .ok_or_else(|| PipelineError::JobNotFound(path.clone()))?;
        if let Some(queued) = ctx.task.print_job_id {
            if queued != job.id {
                return Err(PipelineError::JobMismatch {
                    queued,
                    found: job.id,
                    path: path.clone(),
                });
            }
        }

        let material = material_repo::find_by_id(&self.db, ctx.task.material_id)?
            .ok_or(PipelineError::MaterialNotFound(ctx.task.material_id))?;

        ctx.job = Some(job.clone());
        ctx.material = Some(material.clone());
        Ok((job, material))
    }

    fn handle_failure(&self, ctx: &PipelineContext, err: PipelineError) -> JobResult {
        let kind = err.kind();
        let message = err.to_string();

        match kind {
            FailureKind::Permanent => {
                let Some(job) = &ctx.job else {
                    return JobResult::failed(kind, message);
                };
                let _step = info_span!("record_failure", print_job_id = job.id).entered();
                match job_repo::record_permanent_failure(&self.db, job.id, &message) {
                    Ok(Some(recorded)) => {
                        match recorded {
                            FailureRecorded::OrderCancelled { order_id } => warn!(
                                "Order {} cancelled: job {} cannot be printed: {}",
                                order_id, job.id, message
                            ),
                            FailureRecorded::AlreadyCancelled { .. } => {
                                warn!("Job {} cannot be printed: {}", job.id, message)
                            }
                            FailureRecorded::OrderFulfilled { order_id, status } => warn!(
                                "Order {} already {}; failure of job {} not recorded: {}",
                                order_id, status, job.id, message
                            ),
                        }
                        JobResult::failed(kind, message)
                    }
                    Ok(None) => JobResult::failed(
                        FailureKind::Invariant,
                        PipelineError::JobNotFound(ctx.task.file_path.clone()).to_string(),
                    ),
                    // Unrecorded, so let a later attempt try again.
                    Err(e) => {
                        error!("Failed to record permanent failure for job {}: {}", job.id, e);
                        JobResult::failed(
                            FailureKind::Transient,
                            format!("{} (not recorded: {})", message, e),
                        )
                    }
                }
            }
            FailureKind::Invariant => {
                error!("Queue entry {} cannot run: {}", ctx.task.id, message);
                JobResult::failed(kind, message)
            }
            FailureKind::Transient => {
                warn!("Attempt {} failed: {}", ctx.task.attempts, message);
                JobResult::failed(kind, message)
            }
        }
    }
}
