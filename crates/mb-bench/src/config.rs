//! Benchmark configuration.
//!
//! The set of variants to time is data: a list of `name[:workers]` entries
//! given on the command line or in a JSON file. Command-line values override
//! the file, which overrides the defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use serde::Deserialize;

use mb_tensor::{Alignment, Variant};

use crate::error::{BenchError, Result};

/// One configured kernel invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawVariantSpec")]
pub struct VariantSpec {
    pub variant: Variant,
    pub workers: Option<usize>,
    /// Printed instead of the default `name[:workers]` label.
    pub label: Option<String>,
}

impl VariantSpec {
    pub fn new(variant: Variant) -> Self {
        VariantSpec {
            variant,
            workers: None,
            label: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label used in reports.
    pub fn label(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for VariantSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.workers {
            Some(w) => write!(f, "{}:{}", self.variant, w),
            None => write!(f, "{}", self.variant),
        }
    }
}

impl FromStr for VariantSpec {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        let (name, workers) = match s.split_once(':') {
            Some((name, workers)) => {
                let workers = workers.trim().parse::<usize>().map_err(|e| {
                    BenchError::Config(format!("invalid worker count in `{}`: {}", s, e))
                })?;
                (name, Some(workers))
            }
            None => (s, None),
        };
        Ok(VariantSpec {
            variant: name.trim().parse()?,
            workers,
            label: None,
        })
    }
}

/// Either `"mt:6"` or `{"variant": "mt", "workers": 6, "label": "MT"}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawVariantSpec {
    Short(String),
    Full {
        variant: String,
        #[serde(default)]
        workers: Option<usize>,
        #[serde(default)]
        label: Option<String>,
    },
}

impl TryFrom<RawVariantSpec> for VariantSpec {
    type Error = BenchError;

    fn try_from(raw: RawVariantSpec) -> Result<Self> {
        match raw {
            RawVariantSpec::Short(s) => s.parse(),
            RawVariantSpec::Full {
                variant,
                workers,
                label,
            } => Ok(VariantSpec {
                variant: variant.parse()?,
                workers,
                label,
            }),
        }
    }
}

/// Everything a run needs, fixed before the first invocation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// Side length N of every matrix.
    pub size: usize,
    /// Byte alignment applied to the first input.
    pub alignment: usize,
    /// RNG seed for the inputs; drawn from entropy when absent.
    pub seed: Option<u64>,
    pub variants: Vec<VariantSpec>,
    /// Compare every output with the naive reference after timing.
    pub verify: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            size: 8000,
            alignment: Alignment::AVX.get(),
            seed: None,
            variants: vec![VariantSpec::new(Variant::Device).with_label("OpenCL")],
            verify: false,
        }
    }
}

impl BenchConfig {
    /// Parse a JSON config. Missing fields take their defaults; the result
    /// is not validated, so command-line overrides can still be applied.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn alignment(&self) -> Result<Alignment> {
        Ok(Alignment::new(self.alignment)?)
    }

    /// Reject configurations that could not be bound for every variant.
    pub fn validate(&self) -> Result<()> {
        if self.variants.is_empty() {
            return Err(BenchError::Config("no variants configured".to_string()));
        }
        let bytes = self
            .size
            .checked_mul(self.size)
            .and_then(|len| len.checked_mul(std::mem::size_of::<f64>()));
        if !matches!(bytes, Some(bytes) if bytes <= isize::MAX as usize) {
            return Err(BenchError::Config(format!(
                "matrix size {} is too large to allocate",
                self.size
            )));
        }
        let alignment = self.alignment()?;
        for spec in &self.variants {
            let descriptor = spec.variant.descriptor();
            match (descriptor.takes_workers(), spec.workers) {
                (true, None) => {
                    return Err(BenchError::Config(format!(
                        "`{}` needs a worker count, e.g. `{}:4`",
                        spec.variant, spec.variant
                    )))
                }
                (true, Some(0)) => {
                    return Err(BenchError::Config(format!(
                        "`{}` needs at least one worker",
                        spec
                    )))
                }
                (false, Some(_)) => {
                    return Err(BenchError::Config(format!(
                        "`{}` does not take a worker count",
                        spec.variant
                    )))
                }
                _ => {}
            }
            if let Some(required) = descriptor.required_alignment("a") {
                if alignment < required {
                    return Err(BenchError::Config(format!(
                        "`{}` needs `a` aligned to {} bytes, configured alignment is {}",
                        spec.variant, required, alignment
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Time matrix-multiplication kernels under one call contract.
#[derive(Parser, Debug)]
#[command(name = "mb-bench", version, about)]
pub struct Cli {
    /// Side length N of the square matrices.
    #[arg(short, long)]
    pub size: Option<usize>,

    /// Variant to time, as NAME or NAME:WORKERS (naive, transpose, mt,
    /// device, simd, simd-dot, simd-mt). Repeat to time several, in order.
    #[arg(long = "variant", value_name = "NAME[:WORKERS]")]
    pub variants: Vec<VariantSpec>,

    /// JSON configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Seed for the random inputs.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Byte alignment for the first input (power of two).
    #[arg(long)]
    pub alignment: Option<usize>,

    /// Check every output against the naive reference after timing.
    #[arg(long)]
    pub verify: bool,

    /// More logging on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Merge file and command-line settings into a validated config.
    pub fn into_config(self) -> Result<BenchConfig> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::from_json_file(path)?,
            None => BenchConfig::default(),
        };
        if let Some(size) = self.size {
            config.size = size;
        }
        if !self.variants.is_empty() {
            config.variants = self.variants;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(alignment) = self.alignment {
            config.alignment = alignment;
        }
        config.verify |= self.verify;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_variant_spec() {
        let spec: VariantSpec = "mt:6".parse().unwrap();
        assert_eq!(spec, VariantSpec::new(Variant::Multithreaded).with_workers(6));
        assert_eq!(spec.label(), "mt:6");

        let spec: VariantSpec = "transpose".parse().unwrap();
        assert_eq!(spec.variant, Variant::TransposeFused);
        assert_eq!(spec.workers, None);

        assert!("mt:six".parse::<VariantSpec>().is_err());
        assert!("cuda".parse::<VariantSpec>().is_err());
    }

    #[test]
    fn test_custom_label() {
        let spec = VariantSpec::new(Variant::Device).with_label("OpenCL");
        assert_eq!(spec.label(), "OpenCL");
        assert_eq!(spec.to_string(), "device");
    }

    #[test]
    fn test_json_config() {
        let config = BenchConfig::from_json_str(
            r#"{
                "size": 64,
                "seed": 3,
                "variants": ["naive", "simd-mt:4", {"variant": "device", "label": "OpenCL"}],
                "verify": true
            }"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.size, 64);
        assert_eq!(config.alignment, 32);
        assert_eq!(config.seed, Some(3));
        assert!(config.verify);
        let labels: Vec<String> = config.variants.iter().map(VariantSpec::label).collect();
        assert_eq!(labels, ["naive", "simd-mt:4", "OpenCL"]);
    }

    #[test]
    fn test_json_rejects_unknown_fields_and_variants() {
        assert!(matches!(
            BenchConfig::from_json_str(r#"{"sizes": [8]}"#),
            Err(BenchError::Json(_))
        ));
        assert!(BenchConfig::from_json_str(r#"{"variants": ["opencl"]}"#).is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = BenchConfig {
            size: 8,
            variants: vec!["mt".parse().unwrap()],
            ..BenchConfig::default()
        };
        assert!(matches!(config.validate(), Err(BenchError::Config(_))));

        config.variants = vec!["simd:2".parse().unwrap()];
        assert!(matches!(config.validate(), Err(BenchError::Config(_))));

        config.variants = vec!["simd".parse().unwrap()];
        config.alignment = 16;
        assert!(matches!(config.validate(), Err(BenchError::Config(_))));
        config.alignment = 48;
        assert!(matches!(config.validate(), Err(BenchError::Tensor(_))));
        config.alignment = 64;
        config.validate().unwrap();

        config.variants.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_matrix() {
        let mut config = BenchConfig {
            variants: vec!["naive".parse().unwrap()],
            ..BenchConfig::default()
        };
        for size in [1usize << 32, usize::MAX, 1 << 31] {
            config.size = size;
            assert!(
                matches!(config.validate(), Err(BenchError::Config(ref msg)) if msg.contains("too large")),
                "size {}",
                size
            );
        }
        config.size = 1 << 12;
        config.validate().unwrap();
    }

    #[test]
    fn test_file_validated_after_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"size": 8, "variants": ["mt"]}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::try_parse_from(["mb-bench", "-c", path.as_str()]).unwrap();
        assert!(matches!(cli.into_config(), Err(BenchError::Config(_))));

        let cli =
            Cli::try_parse_from(["mb-bench", "-c", path.as_str(), "--variant", "mt:2"]).unwrap();
        assert_eq!(cli.into_config().unwrap().variants[0].workers, Some(2));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"size": 100, "seed": 1, "variants": ["naive"]}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::try_parse_from([
            "mb-bench",
            "--config",
            path.as_str(),
            "--size",
            "16",
            "--variant",
            "mt:2",
            "--variant",
            "simd",
            "--verify",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let config = cli.into_config().unwrap();
        assert_eq!(config.size, 16);
        assert_eq!(config.seed, Some(1));
        assert!(config.verify);
        assert_eq!(config.variants.len(), 2);
        assert_eq!(config.variants[0].workers, Some(2));
    }

    #[test]
    fn test_cli_defaults() {
        let config = Cli::try_parse_from(["mb-bench"]).unwrap().into_config().unwrap();
        assert_eq!(config, BenchConfig::default());
        assert_eq!(config.variants[0].label(), "OpenCL");
    }

    #[test]
    fn test_cli_rejects_bad_variant() {
        assert!(Cli::try_parse_from(["mb-bench", "--variant", "mt:x"]).is_err());
    }
}
