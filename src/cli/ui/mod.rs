mod output;
mod report;

pub use output::Output;
pub use report::{
    OutputFormat, ProjectOverview, print_json, print_run_detail, print_run_list,
    print_workflow_result,
};
