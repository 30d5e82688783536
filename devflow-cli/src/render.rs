//! Plain-text rendering of iteration records.

use devflow::iteration_log::IterationRecord;
use devflow::utils::truncate_chars;
use std::fmt::Write as _;
use std::path::Path;

/// Characters of raw test output shown with `--full`.
pub const FULL_OUTPUT_CHARS: usize = 1000;
const ROOT_CAUSE_CHARS: usize = 200;
const SUGGESTION_CHARS: usize = 150;
const MAX_SUGGESTIONS: usize = 3;

fn rule(ch: char) -> String {
    std::iter::repeat(ch).take(80).collect()
}

/// Renders the banner shown above every listing.
pub fn header(path: &Path, total: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", rule('='));
    let _ = writeln!(out, "Iteration Log: {}", path.display());
    let _ = writeln!(out, "Total iterations: {total}");
    let _ = writeln!(out, "{}", rule('='));
    out
}

/// Renders one line per record plus usage hints.
pub fn summary(records: &[IterationRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let status = if record.test_passed { "PASS" } else { "FAIL" };
        let _ = writeln!(
            out,
            "  [{status}] Iteration {:2} - {}",
            record.iteration, record.timestamp
        );
    }
    out.push('\n');
    out.push_str("Use --iteration <N> to see details of a specific iteration\n");
    out.push_str("Use --latest to see the most recent iteration\n");
    out.push_str("Use --full to include complete test output\n");
    out
}

/// Renders one record in detail.
///
/// Analysis, fixed files and raw output are only shown for failing
/// iterations; raw output only when `full` is set.
pub fn detail(record: &IterationRecord, full: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule('='));
    let _ = writeln!(out, "Iteration {}", record.iteration);
    let _ = writeln!(out, "Time: {}", record.timestamp);
    let _ = writeln!(out, "{}\n", rule('='));

    let verdict = if record.test_passed { "PASSED" } else { "FAILED" };
    let _ = writeln!(out, "Test Result: {verdict}");
    let _ = writeln!(out, "   Total tests: {}", record.test_stats.total);
    let _ = writeln!(out, "   Failed: {}", record.test_stats.failed);

    if record.test_passed {
        return out;
    }

    if let Some(analysis) = &record.analysis {
        let _ = writeln!(out, "\nError Analysis:");
        let _ = writeln!(out, "   Error type: {}", analysis.error_type);
        let _ = writeln!(
            out,
            "   Location: {}",
            analysis.location.as_deref().unwrap_or("N/A")
        );
        let _ = writeln!(
            out,
            "   Root cause: {}...",
            truncate_chars(&analysis.root_cause, ROOT_CAUSE_CHARS)
        );
        if !analysis.fix_suggestions.is_empty() {
            let _ = writeln!(out, "\nFix Suggestions:");
            for (i, suggestion) in analysis.fix_suggestions.iter().take(MAX_SUGGESTIONS).enumerate() {
                let _ = writeln!(out, "   {}. {}...", i + 1, truncate_chars(suggestion, SUGGESTION_CHARS));
            }
        }
    }

    if !record.fixed_files.is_empty() {
        let _ = writeln!(out, "\nFixed Files ({}):", record.fixed_files.len());
        for name in &record.fixed_files {
            let _ = writeln!(out, "   - {name}");
        }
    }

    if full {
        if let Some(output) = record.test_output.as_deref().filter(|o| !o.is_empty()) {
            let _ = writeln!(out, "\nFull Test Output:");
            let _ = writeln!(out, "{}", rule('-'));
            let _ = writeln!(out, "{}", truncate_chars(output, FULL_OUTPUT_CHARS));
            let total = output.chars().count();
            if total > FULL_OUTPUT_CHARS {
                let _ = writeln!(out, "\n... ({} more characters)", total - FULL_OUTPUT_CHARS);
            }
            let _ = writeln!(out, "{}", rule('-'));
        }
    }
    out
}
