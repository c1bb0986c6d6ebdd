/// Ordered threshold table: first band whose lower bound is <= the value wins.
#[derive(Debug, Clone, Copy)]
pub struct BandTable {
    bands: &'static [(f64, &'static str)],
    fallback: &'static str,
}

impl BandTable {
    pub fn classify(&self, percentage: f64) -> &'static str {
        self.bands
            .iter()
            .find(|(min, _)| percentage >= *min)
            .map(|(_, label)| *label)
            .unwrap_or(self.fallback)
    }
}

/// Academic grade letters used on result cards and class reports.
pub const ACADEMIC_GRADES: BandTable = BandTable {
    bands: &[
        (90.0, "A+"),
        (80.0, "A"),
        (70.0, "B+"),
        (60.0, "B"),
        (50.0, "C"),
        (40.0, "D"),
    ],
    fallback: "F",
};

/// Attendance quality labels.
pub const ATTENDANCE_BANDS: BandTable = BandTable {
    bands: &[(95.0, "Excellent"), (90.0, "Good"), (85.0, "Average")],
    fallback: "Poor",
};

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsError {
    pub code: String,
    pub message: String,
}

impl MetricsError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Half-away-from-zero rounding to 2 decimals.
pub fn round_2dp(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn percentage(part: f64, whole: f64) -> Result<f64, MetricsError> {
    if !part.is_finite() || !whole.is_finite() {
        return Err(MetricsError::new("bad_input", "values must be finite numbers"));
    }
    if whole <= 0.0 {
        return Err(MetricsError::new(
            "zero_total",
            "total must be greater than zero",
        ));
    }
    Ok(round_2dp(100.0 * part / whole))
}

/// `{ total, maxOrBase, percentage, category }` as shown on every report.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub total: f64,
    pub max_or_base: f64,
    pub percentage: f64,
    pub category: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub label: String,
    pub obtained: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredLine {
    pub label: String,
    pub obtained: f64,
    pub total: f64,
    pub percentage: f64,
    pub grade: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSummary {
    pub items: Vec<ScoredLine>,
    pub aggregate: Aggregate,
}

pub fn summarize_scores(items: &[ScoredItem]) -> Result<ScoreSummary, MetricsError> {
    if items.is_empty() {
        return Err(MetricsError::new("empty_input", "no scored items"));
    }

    let mut lines = Vec::with_capacity(items.len());
    let mut obtained_sum = 0.0;
    let mut total_sum = 0.0;
    for item in items {
        let pct = percentage(item.obtained, item.total).map_err(|e| MetricsError {
            message: format!("{}: {}", item.label, e.message),
            ..e
        })?;
        obtained_sum += item.obtained;
        total_sum += item.total;
        lines.push(ScoredLine {
            label: item.label.clone(),
            obtained: item.obtained,
            total: item.total,
            percentage: pct,
            grade: ACADEMIC_GRADES.classify(pct),
        });
    }

    let pct = percentage(obtained_sum, total_sum)?;
    Ok(ScoreSummary {
        items: lines,
        aggregate: Aggregate {
            total: obtained_sum,
            max_or_base: total_sum,
            percentage: pct,
            category: ACADEMIC_GRADES.classify(pct),
        },
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PayComponent {
    pub fixed: f64,
    pub bonus: f64,
    pub deduction: f64,
}

impl PayComponent {
    pub fn net(&self) -> f64 {
        self.fixed + self.bonus - self.deduction
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PayTotals {
    pub count: usize,
    pub fixed: f64,
    pub bonus: f64,
    pub deduction: f64,
    pub net: f64,
}

/// Column totals for a salary sheet. An empty sheet totals to zero.
pub fn pay_totals<'a, I>(components: I) -> PayTotals
where
    I: IntoIterator<Item = &'a PayComponent>,
{
    components
        .into_iter()
        .fold(PayTotals::default(), |mut acc, c| {
            acc.count += 1;
            acc.fixed += c.fixed;
            acc.bonus += c.bonus;
            acc.deduction += c.deduction;
            acc.net += c.net();
            acc
        })
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AttendanceTally {
    pub present: u32,
    pub absent: u32,
}

impl AttendanceTally {
    pub fn total(&self) -> u32 {
        self.present + self.absent
    }

    pub fn record(&mut self, present: bool) {
        if present {
            self.present += 1;
        } else {
            self.absent += 1;
        }
    }

    pub fn summarize(&self) -> Result<Aggregate, MetricsError> {
        if self.total() == 0 {
            return Err(MetricsError::new("empty_input", "no attendance recorded"));
        }
        let rate = percentage(self.present as f64, self.total() as f64)?;
        Ok(Aggregate {
            total: self.present as f64,
            max_or_base: self.total() as f64,
            percentage: rate,
            category: ATTENDANCE_BANDS.classify(rate),
        })
    }
}

/// Standard competition ranking ("1224"), highest value first.
/// Returns the rank for each input position.
pub fn competition_ranks(values: &[f64]) -> Vec<usize> {
    values
        .iter()
        .map(|v| 1 + values.iter().filter(|other| **other > *v).count())
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(round_2dp(values.iter().sum::<f64>() / values.len() as f64))
}
