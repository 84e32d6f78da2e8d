use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    dummy::DummyDataSource,
    error::{ConfigurationError, DatasetError},
    feature_converter::PadTrimConverter,
    local::LocalDataSource,
    options::{DatasetOptions, SequenceLengths},
    packing::{PackOp, PackerKind},
    preprocessors::{drop_features, filter_empty, rename_feature, truncate_feature, Preprocessor},
    registry::Registry,
    task::Task,
    traits::DataSource,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// A directory of `<split>.jsonl` files. Relative paths are resolved
    /// against the config file's directory.
    Local { dir: PathBuf },
    Dummy {
        splits: Vec<String>,
        num_records: usize,
        seq_len: usize,
    },
}

impl SourceConfig {
    fn load(&self, base_dir: &Path) -> anyhow::Result<Arc<dyn DataSource>> {
        let source: Arc<dyn DataSource> = match self {
            SourceConfig::Local { dir } => {
                Arc::new(LocalDataSource::new_from_directory(base_dir.join(dir))?)
            }
            SourceConfig::Dummy {
                splits,
                num_records,
                seq_len,
            } => {
                let splits: Vec<&str> = splits.iter().map(String::as_str).collect();
                Arc::new(DummyDataSource::new(&splits, *num_records, *seq_len))
            }
        };
        Ok(source)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PreprocessorConfig {
    Rename {
        from: String,
        to: String,
    },
    DropFeatures {
        features: Vec<String>,
    },
    Truncate {
        feature: String,
        length: usize,
    },
    FilterEmpty {
        feature: String,
    },
    Pack {
        pool_size: usize,
        packer: PackerKind,
        feature_lengths: SequenceLengths,
    },
}

impl PreprocessorConfig {
    pub fn build(&self) -> Result<Preprocessor, ConfigurationError> {
        Ok(match self {
            PreprocessorConfig::Rename { from, to } => rename_feature(from, to),
            PreprocessorConfig::DropFeatures { features } => drop_features(features.clone()),
            PreprocessorConfig::Truncate { feature, length } => truncate_feature(feature, *length),
            PreprocessorConfig::FilterEmpty { feature } => filter_empty(feature),
            PreprocessorConfig::Pack {
                pool_size,
                packer,
                feature_lengths,
            } => Preprocessor::Pack(PackOp::new(
                *pool_size,
                *packer,
                feature_lengths.clone(),
            )?),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub preprocessors: Vec<PreprocessorConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    pub weight: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MixtureConfig {
    pub name: String,
    pub components: Vec<ComponentConfig>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureConverterConfig {
    #[serde(default)]
    pub pad_id: i32,
}

/// Tasks, mixtures and request options, as read from a TOML file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub options: DatasetOptions,
    #[serde(default)]
    pub feature_converter: Option<FeatureConverterConfig>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
    #[serde(default)]
    pub mixtures: Vec<MixtureConfig>,
}

impl ProvidersConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads a config file; returns it with the directory relative source
    /// paths are resolved against.
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok((config, base_dir))
    }

    pub fn feature_converter(&self) -> Option<PadTrimConverter> {
        self.feature_converter
            .map(|config| PadTrimConverter::new(config.pad_id))
    }

    /// Loads every source and registers every task and mixture.
    pub fn build_registry(&self, base_dir: &Path) -> Result<Registry, DatasetError> {
        let mut registry = Registry::new();
        for task in &self.tasks {
            let source = task
                .source
                .load(base_dir)
                .with_context(|| format!("failed to load source of task {}", task.name))?;
            let preprocessors = task
                .preprocessors
                .iter()
                .map(PreprocessorConfig::build)
                .collect::<Result<Vec<_>, _>>()?;
            registry.add_task(Task::new(&task.name, source, preprocessors))?;
        }
        for mixture in &self.mixtures {
            registry.add_mixture(
                &mixture.name,
                mixture
                    .components
                    .iter()
                    .map(|c| (c.name.clone(), c.weight))
                    .collect(),
            )?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"
        [options]
        split = "train"
        seed = 7
        shuffle = false

        [feature_converter]
        pad_id = -1

        [[tasks]]
        name = "a"
        source = { kind = "dummy", splits = ["train"], num_records = 10, seq_len = 4 }
        preprocessors = [
            { op = "truncate", feature = "tokens", length = 2 },
            { op = "pack", pool_size = 4, packer = { kind = "multi_bin", num_partial_examples = 2 }, feature_lengths = { tokens = 4 } },
        ]

        [[tasks]]
        name = "b"
        source = { kind = "dummy", splits = ["train"], num_records = 10, seq_len = 4 }

        [[mixtures]]
        name = "ab"
        components = [{ name = "a", weight = 3.0 }, { name = "b", weight = 1.0 }]
    "#;

    #[test]
    fn test_parse() {
        let config = ProvidersConfig::from_toml(CONFIG).unwrap();
        assert_eq!(config.options.seed, Some(7));
        assert_eq!(config.feature_converter().unwrap().pad_id, -1);
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(
            config.tasks[0].preprocessors[1],
            PreprocessorConfig::Pack {
                pool_size: 4,
                packer: PackerKind::MultiBin {
                    num_partial_examples: 2
                },
                feature_lengths: SequenceLengths::from([("tokens".to_owned(), 4)]),
            }
        );
        assert!(config.tasks[1].preprocessors.is_empty());
    }

    #[test]
    fn test_build_registry() {
        let config = ProvidersConfig::from_toml(CONFIG).unwrap();
        let mut registry = config.build_registry(Path::new(".")).unwrap();
        let ab = registry.get("ab").unwrap();
        assert_eq!(ab.as_mixture().unwrap().total_proportion(), 4.0);
        assert_eq!(
            registry.get_task("a").unwrap().get_preprocessors().len(),
            2
        );
    }

    #[test]
    fn test_invalid_pack_is_configuration_error() {
        let config = ProvidersConfig::from_toml(
            r#"
            [[tasks]]
            name = "a"
            source = { kind = "dummy", splits = ["train"], num_records = 1, seq_len = 1 }
            preprocessors = [{ op = "pack", pool_size = 0, packer = { kind = "noam" }, feature_lengths = { tokens = 4 } }]
            "#,
        )
        .unwrap();
        let err = config.build_registry(Path::new(".")).unwrap_err();
        assert!(matches!(
            err.as_configuration(),
            Some(ConfigurationError::InvalidPacking(_))
        ));
    }

    #[test]
    fn test_missing_local_dir_is_data_error() {
        let config = ProvidersConfig::from_toml(
            r#"
            [[tasks]]
            name = "a"
            source = { kind = "local", dir = "does/not/exist" }
            "#,
        )
        .unwrap();
        let err = config.build_registry(Path::new(".")).unwrap_err();
        assert!(err.as_configuration().is_none());
        assert!(format!("{err:#}").contains("task a"));
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let parsed = ProvidersConfig::from_toml(
            r#"
            [[tasks]]
            name = "a"
            source = { kind = "dummy", splits = ["train"], num_records = 1, seq_len = 1 }
            preprocessors = [{ op = "tokenize" }]
            "#,
        );
        assert!(parsed.is_err());
    }
}
