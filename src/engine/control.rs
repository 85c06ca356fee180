//! Control flow state

use serde::{Deserialize, Serialize};

use crate::error::{RuntimeErrorKind, Span};
use crate::typesys::Value;

/// Active control flow. When this is anything but `None`, the engine
/// unwinds the frame stack until a frame claims it: loops claim break and
/// continue, function frames claim return, try frames claim throw, and
/// suspend stops the process where it stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Control {
    None,
    Break(Option<String>),
    Continue(Option<String>),
    Return(Value),
    Throw { kind: RuntimeErrorKind, span: Span },
    Suspend,
}

impl Control {
    pub fn is_none(&self) -> bool {
        matches!(self, Control::None)
    }
}
