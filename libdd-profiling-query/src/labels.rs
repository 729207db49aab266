// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::QueryError;
use serde::Serialize;

/// The label that names the profile. It is stored as the sample kind's name
/// rather than as a series label.
pub const METRIC_NAME_LABEL: &str = "__name__";

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A canonical representation for sets of labels: sorted by name, with no
/// name appearing twice. Two sets holding the same labels compare equal and
/// hash the same regardless of the order they were given in.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LabelSet {
    // Guaranteed to be sorted and free of duplicate names by [Self::try_new]
    sorted_labels: Box<[Label]>,
}

impl LabelSet {
    pub fn try_new(mut labels: Vec<Label>) -> Result<Self, QueryError> {
        labels.sort_unstable();
        if let Some(pair) = labels.windows(2).find(|pair| pair[0].name == pair[1].name) {
            return Err(QueryError::invalid(format!(
                "duplicate label name {:?}",
                pair[0].name
            )));
        }
        Ok(Self {
            sorted_labels: labels.into_boxed_slice(),
        })
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::try_new(
            pairs
                .into_iter()
                .map(|(name, value)| Label::new(name, value))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.sorted_labels
            .binary_search_by(|label| label.name.as_str().cmp(name))
            .ok()
            .map(|index| self.sorted_labels[index].value.as_str())
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Label> {
        self.sorted_labels.iter()
    }

    pub fn len(&self) -> usize {
        self.sorted_labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted_labels.is_empty()
    }

    /// Splits off the label called `name`, returning its value and the
    /// remaining set.
    pub fn take(&self, name: &str) -> (Option<String>, LabelSet) {
        let mut taken = None;
        let mut rest = Vec::with_capacity(self.len());
        for label in self.iter() {
            if label.name == name {
                taken = Some(label.value.clone());
            } else {
                rest.push(label.clone());
            }
        }
        let rest = LabelSet {
            sorted_labels: rest.into_boxed_slice(),
        };
        (taken, rest)
    }

    /// Adds the labels of `extra` whose name isn't present yet. Existing
    /// labels are kept as they are.
    pub fn with_defaults(&self, extra: impl IntoIterator<Item = Label>) -> LabelSet {
        let mut labels = self.sorted_labels.to_vec();
        for label in extra {
            if self.get(&label.name).is_none()
                && !labels.iter().any(|existing| existing.name == label.name)
            {
                labels.push(label);
            }
        }
        labels.sort_unstable();
        LabelSet {
            sorted_labels: labels.into_boxed_slice(),
        }
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a Label;
    type IntoIter = core::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
