//! Parameter Store
//!
//! The network owns every learnable tensor in one arena keyed by
//! `(layer name, slot)`. Layers never hold parameters themselves; they borrow a
//! [`ParamView`] for the duration of a single forward or backward call.
//!
//! The input slot of a layer is not stored here: it is the previous layer's
//! activation, produced and consumed inside one pass.
//!
//! Each entry also carries the optimizer accumulator for that slot (momentum
//! velocity or RMS moving average). It starts as `None` and is zero-filled the
//! first time an update rule asks for it.

use crate::tensor::Blob;
use std::collections::BTreeMap;
use std::fmt;

/// Learnable parameter slot of a layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamSlot {
    Weight,
    Bias,
}

impl ParamSlot {
    pub const ALL: [ParamSlot; 2] = [ParamSlot::Weight, ParamSlot::Bias];

    /// Tag used in checkpoints
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamSlot::Weight => "WEIGHT",
            ParamSlot::Bias => "BIAS",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "WEIGHT" => Some(ParamSlot::Weight),
            "BIAS" => Some(ParamSlot::Bias),
            _ => None,
        }
    }
}

impl fmt::Display for ParamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arena key
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamKey {
    pub layer: String,
    pub slot: ParamSlot,
}

impl ParamKey {
    pub fn new(layer: &str, slot: ParamSlot) -> Self {
        Self {
            layer: layer.to_string(),
            slot,
        }
    }
}

/// One learnable tensor plus its optimizer accumulator
#[derive(Clone, Debug)]
pub struct Param {
    pub value: Blob,
    pub accumulator: Option<Blob>,
}

impl Param {
    pub fn new(value: Blob) -> Self {
        Self {
            value,
            accumulator: None,
        }
    }

    /// Accumulator for this slot, created zero-filled on first access
    pub fn accumulator_mut(&mut self) -> &mut Blob {
        let shape = self.value.shape();
        self.accumulator.get_or_insert_with(|| Blob::zeros(shape))
    }

    /// Split borrow of the value and its (lazily created) accumulator
    pub fn value_and_accumulator(&mut self) -> (&mut Blob, &mut Blob) {
        let shape = self.value.shape();
        let acc = self.accumulator.get_or_insert_with(|| Blob::zeros(shape));
        (&mut self.value, acc)
    }
}

/// Borrowed weight and bias of one layer
#[derive(Clone, Copy, Debug)]
pub struct ParamView<'a> {
    pub weight: &'a Blob,
    pub bias: &'a Blob,
}

/// Arena of all learnable tensors, keyed by `(layer name, slot)`
#[derive(Clone, Debug, Default)]
pub struct ParamStore {
    entries: BTreeMap<ParamKey, Param>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) a layer's weight and bias
    ///
    /// Replacing a value discards any optimizer accumulator it had.
    pub fn insert_layer(&mut self, layer: &str, weight: Blob, bias: Blob) {
        self.insert(layer, ParamSlot::Weight, weight);
        self.insert(layer, ParamSlot::Bias, bias);
    }

    pub fn insert(&mut self, layer: &str, slot: ParamSlot, value: Blob) {
        self.entries.insert(ParamKey::new(layer, slot), Param::new(value));
    }

    pub fn get(&self, layer: &str, slot: ParamSlot) -> Option<&Param> {
        self.entries.get(&ParamKey::new(layer, slot))
    }

    pub fn get_mut(&mut self, layer: &str, slot: ParamSlot) -> Option<&mut Param> {
        self.entries.get_mut(&ParamKey::new(layer, slot))
    }

    pub fn value(&self, layer: &str, slot: ParamSlot) -> Option<&Blob> {
        self.get(layer, slot).map(|p| &p.value)
    }

    /// Both slots of a layer, if it has learnable parameters
    pub fn view(&self, layer: &str) -> Option<ParamView<'_>> {
        let weight = self.value(layer, ParamSlot::Weight)?;
        let bias = self.value(layer, ParamSlot::Bias)?;
        Some(ParamView { weight, bias })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &Param)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ParamKey, &mut Param)> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of learnable scalars
    pub fn num_parameters(&self) -> usize {
        self.entries.values().map(|p| p.value.shape().len()).sum()
    }
}
