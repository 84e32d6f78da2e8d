use std::fmt;

use anyhow::bail;

use crate::{
    options::SequenceLengths,
    preprocessors::Preprocessor,
    record::Value,
};

/// Produces the operations that bring task records to the shapes a model
/// expects.
pub trait FeatureConverter: Send + Sync + fmt::Debug {
    fn get_transforms(&self, task_feature_lengths: Option<&SequenceLengths>) -> Vec<Preprocessor>;
}

/// Trims or pads every token feature named in the lengths to exactly that
/// length.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PadTrimConverter {
    pub pad_id: i32,
}

impl PadTrimConverter {
    pub fn new(pad_id: i32) -> Self {
        Self { pad_id }
    }
}

impl FeatureConverter for PadTrimConverter {
    fn get_transforms(&self, task_feature_lengths: Option<&SequenceLengths>) -> Vec<Preprocessor> {
        let Some(lengths) = task_feature_lengths else {
            return Vec::new();
        };
        let pad_id = self.pad_id;
        lengths
            .iter()
            .map(|(feature, &length)| {
                let feature = feature.clone();
                Preprocessor::map(format!("pad_trim({feature},{length})"), move |mut record| {
                    match record.get_mut(&feature) {
                        Some(Value::Tokens(tokens)) => tokens.resize(length, pad_id),
                        Some(other) => bail!("cannot pad {} feature {feature}", other.kind()),
                        None => bail!("feature {feature} is missing"),
                    }
                    Ok(record)
                })
            })
            .collect()
    }
}
