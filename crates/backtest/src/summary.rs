//! Counters collected over one pipeline run.

use std::collections::BTreeMap;
use std::fmt;

use oi_strangle_core::Situation;
use serde::Serialize;

/// Totals for a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Bars processed.
    pub bars: usize,
    /// Patterns newly confirmed during the run.
    pub patterns: usize,
    /// Journaled signals per situation (`none`, `1`, `2`, `3`).
    pub signals: BTreeMap<String, usize>,
    /// Signals already present in the journal, not recorded again.
    pub duplicate_signals: usize,
    /// Confirmation timestamps skipped because OI data was unusable.
    pub skipped_timestamps: usize,
    /// Execution results by outcome label.
    pub executions: BTreeMap<String, usize>,
    /// Executions that ended in an error other than a halt.
    pub execution_errors: usize,
    /// Positions closed by the mark-to-market check.
    pub risk_closes: usize,
}

impl RunSummary {
    pub(crate) fn count_signal(&mut self, situation: Situation) {
        *self.signals.entry(situation.to_string()).or_default() += 1;
    }

    pub(crate) fn count_execution(&mut self, label: &str) {
        *self.executions.entry(label.to_string()).or_default() += 1;
    }

    /// Signals journaled for one situation.
    #[must_use]
    pub fn signals_for(&self, situation: Situation) -> usize {
        self.signals
            .get(&situation.to_string())
            .copied()
            .unwrap_or_default()
    }

    /// Executions that ended with the given outcome label.
    #[must_use]
    pub fn executions_for(&self, label: &str) -> usize {
        self.executions.get(label).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn total_signals(&self) -> usize {
        self.signals.values().sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bars:               {}", self.bars)?;
        writeln!(f, "patterns:           {}", self.patterns)?;
        writeln!(f, "signals:            {}", self.total_signals())?;
        for (situation, count) in &self.signals {
            writeln!(f, "  situation {situation:<8} {count}")?;
        }
        writeln!(f, "duplicate signals:  {}", self.duplicate_signals)?;
        writeln!(f, "skipped timestamps: {}", self.skipped_timestamps)?;
        writeln!(f, "executions:")?;
        for (outcome, count) in &self.executions {
            writeln!(f, "  {outcome:<18} {count}")?;
        }
        writeln!(f, "execution errors:   {}", self.execution_errors)?;
        write!(f, "risk closes:        {}", self.risk_closes)
    }
}
