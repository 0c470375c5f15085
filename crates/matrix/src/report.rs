//! Matrix results and report rendering.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identity of one matrix cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId {
    pub client_runtime: String,
    pub server_runtime: String,
    pub crypto_id: String,
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} [{}]",
            self.client_runtime, self.server_runtime, self.crypto_id
        )
    }
}

/// Terminal state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellStatus {
    Passed,
    Failed,
    /// Excluded by the compatibility validator before any spawn.
    Skipped,
    /// Unfinished when the suite timeout fired.
    TimedOut,
}

impl CellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellStatus::Passed => "passed",
            CellStatus::Failed => "failed",
            CellStatus::Skipped => "skipped",
            CellStatus::TimedOut => "timed-out",
        }
    }
}

/// Immutable record of one executed (or skipped) cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixRunResult {
    pub cell: CellId,
    pub status: CellStatus,
    pub duration: Duration,
    /// Taxonomy kind plus a short diagnostic, for non-passing cells.
    pub error_detail: Option<String>,
}

/// Aggregated suite outcome.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MatrixReport {
    pub results: Vec<MatrixRunResult>,
}

impl MatrixReport {
    pub fn count(&self, status: CellStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Whether the suite's process exit status should be non-zero.
    pub fn any_failed(&self) -> bool {
        self.results
            .iter()
            .any(|r| matches!(r.status, CellStatus::Failed | CellStatus::TimedOut))
    }

    /// Human-readable summary: every cell with its status, failures with
    /// their taxonomy kind and diagnostic.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "matrix: {} cells, {} passed, {} failed, {} skipped, {} timed out",
            self.results.len(),
            self.count(CellStatus::Passed),
            self.count(CellStatus::Failed),
            self.count(CellStatus::Skipped),
            self.count(CellStatus::TimedOut),
        );
        for result in &self.results {
            let _ = write!(
                out,
                "  [{:>9}] {} ({:.1}s)",
                result.status.as_str(),
                result.cell,
                result.duration.as_secs_f64()
            );
            if let Some(detail) = &result.error_detail {
                let _ = write!(out, " - {detail}");
            }
            let _ = writeln!(out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: CellStatus, detail: Option<&str>) -> MatrixRunResult {
        MatrixRunResult {
            cell: CellId {
                client_runtime: "rust".into(),
                server_runtime: "go".into(),
                crypto_id: "ec-p256".into(),
            },
            status,
            duration: Duration::from_millis(1500),
            error_detail: detail.map(String::from),
        }
    }

    #[test]
    fn failed_and_timed_out_cells_fail_the_suite() {
        let mut report = MatrixReport::default();
        report.results.push(result(CellStatus::Passed, None));
        report.results.push(result(CellStatus::Skipped, None));
        assert!(!report.any_failed());

        report
            .results
            .push(result(CellStatus::Failed, Some("tls_handshake/client_auth: denied")));
        assert!(report.any_failed());
    }

    #[test]
    fn render_lists_every_cell() {
        let mut report = MatrixReport::default();
        report.results.push(result(CellStatus::Passed, None));
        report.results.push(result(
            CellStatus::Failed,
            Some("handshake_timeout: no line within 10s"),
        ));
        let rendered = report.render();
        assert!(rendered.contains("2 cells"));
        assert!(rendered.contains("rust -> go [ec-p256]"));
        assert!(rendered.contains("handshake_timeout"));
    }
}
