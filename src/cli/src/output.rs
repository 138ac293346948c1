//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};
use containerdisks_runtime::pipeline::JobReport;
use containerdisks_runtime::{PublishOutcome, RunReport, VerifyOutcome};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// One-line description of a pipeline outcome.
pub trait Summary {
    fn status(&self) -> &'static str;
    fn detail(&self) -> String;
}

impl Summary for PublishOutcome {
    fn status(&self) -> &'static str {
        match self {
            PublishOutcome::UpToDate => "up to date",
            PublishOutcome::Published { .. } => "published",
            PublishOutcome::DryRun { .. } => "built (dry run)",
        }
    }

    fn detail(&self) -> String {
        match self {
            PublishOutcome::UpToDate => String::new(),
            PublishOutcome::Published { tags } | PublishOutcome::DryRun { tags } => tags.join(", "),
        }
    }
}

impl Summary for VerifyOutcome {
    fn status(&self) -> &'static str {
        match self {
            VerifyOutcome::NothingToVerify => "nothing to verify",
            VerifyOutcome::Verified { .. } => "verified",
            VerifyOutcome::DryRun { .. } => "verified (dry run)",
        }
    }

    fn detail(&self) -> String {
        match self {
            VerifyOutcome::NothingToVerify => String::new(),
            VerifyOutcome::Verified { vm, tags } | VerifyOutcome::DryRun { vm, tags } => {
                format!("{} via {}", tags.join(", "), vm)
            }
        }
    }
}

/// Summary table of a pool run: one row per artifact.
pub fn report_table<T: Summary>(report: &RunReport<T>) -> Table {
    let mut table = new_table(&["ARTIFACT", "STATUS", "DETAIL"]);
    for JobReport { artifact, result } in &report.jobs {
        match result {
            Ok(outcome) => table.add_row(vec![
                artifact.clone(),
                outcome.status().to_string(),
                outcome.detail(),
            ]),
            Err(e) => table.add_row(vec![artifact.clone(), "failed".to_string(), e.to_string()]),
        };
    }
    table
}
