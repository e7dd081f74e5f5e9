use std::fmt;

/// Wall-clock time of one kernel invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchResult {
    pub label: String,
    pub seconds: f64,
}

impl fmt::Display for BenchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.label, self.seconds)
    }
}

/// Results of one run, in invocation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BenchReport {
    pub size: usize,
    pub results: Vec<BenchResult>,
}

impl BenchReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&BenchResult> {
        self.results.iter().find(|r| r.label == label)
    }
}

/// One `label seconds` line per result.
impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(f, "{}", result)?;
        }
        Ok(())
    }
}
