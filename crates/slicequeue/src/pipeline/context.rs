use crate::db::job_repo::PrintJobRow;
use crate::db::material_repo::MaterialRow;
use crate::db::queue_repo::TaskRow;
use crate::report::SliceEstimate;
use crate::slicer::SliceOutput;

pub struct PipelineContext {
    // Input
    pub task: TaskRow,

    // Step 1 results
    pub job: Option<PrintJobRow>,
    pub material: Option<MaterialRow>,

    // Step 2 result: true if this attempt moved the order out of QUEUED
    pub order_started: bool,

    // Step 3 result
    pub output: Option<SliceOutput>,

    // Step 4 result
    pub estimate: Option<SliceEstimate>,

    // Step 5 result
    pub cost: Option<i64>,
}

impl PipelineContext {
    pub fn new(task: TaskRow) -> Self {
        Self {
            task,
            job: None,
            material: None,
            order_started: false,
            output: None,
            estimate: None,
            cost: None,
        }
    }
}
