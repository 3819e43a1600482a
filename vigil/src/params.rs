//! Runtime-mutable detection parameters.
//!
//! A [`ParameterSet`] is built once, at configuration time, and then shared between the trigger
//! thread that reads it every frame and whatever administrative interface adjusts values while
//! the trigger runs. The set of names and the type of every parameter is fixed after creation;
//! only the values change.

use crate::prelude::v1::*;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Type tag of a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub enum Kind {
    Bool,
    Int,
    Double,
    String,
}

/// Value of a parameter.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(::serde::Serialize, ::serde::Deserialize),
    serde(untagged)
)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Bool(_) => Kind::Bool,
            Self::Int(_) => Kind::Int,
            Self::Double(_) => Kind::Double,
            Self::String(_) => Kind::String,
        }
    }

    /// Convert the value to the given kind, if that is lossless.
    ///
    /// The only conversion performed is integer to double, so that `1` is accepted where `1.0`
    /// is expected.
    pub fn coerce(self, kind: Kind) -> Option<Self> {
        match (self, kind) {
            (v, k) if v.kind() == k => Some(v),
            (Self::Int(i), Kind::Double) => Some(Self::Double(i as f64)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Single named parameter.
pub struct Parameter {
    descr: String,
    kind: Kind,
    value: RwLock<Value>,
}

impl Parameter {
    fn new(descr: &str, value: Value) -> Self {
        Self {
            descr: descr.to_string(),
            kind: value.kind(),
            value: RwLock::new(value),
        }
    }

    pub fn descr(&self) -> &str {
        &self.descr
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Copy out the current value.
    pub fn get(&self) -> Value {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, value: Value) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

/// Name to parameter map.
///
/// Reads of undeclared names, or reads with the wrong type, are programming errors and panic.
/// Writes come from user input and return errors instead.
#[derive(Default)]
pub struct ParameterSet {
    params: BTreeMap<String, Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter.
    ///
    /// The type of `value` becomes the fixed type of the parameter. Declaring an existing name
    /// again replaces it.
    ///
    /// # Arguments
    ///
    /// * `name` - name to look the parameter up by.
    /// * `descr` - human readable description.
    /// * `value` - initial value.
    pub fn with(mut self, name: &str, descr: &str, value: impl Into<Value>) -> Self {
        self.add(name, descr, value);
        self
    }

    /// Declare a parameter in place. See [`with`](Self::with).
    pub fn add(&mut self, name: &str, descr: &str, value: impl Into<Value>) {
        self.params
            .insert(name.to_string(), Parameter::new(descr, value.into()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    fn lookup(&self, name: &str) -> &Parameter {
        self.params
            .get(name)
            .unwrap_or_else(|| panic!("internal error: parameter \"{name}\" is not declared"))
    }

    fn mismatch(name: &str, wanted: Kind, got: &Value) -> ! {
        panic!(
            "internal error: parameter \"{name}\" is {:?}, read as {wanted:?}",
            got.kind()
        )
    }

    pub fn get_bool(&self, name: &str) -> bool {
        match self.lookup(name).get() {
            Value::Bool(v) => v,
            v => Self::mismatch(name, Kind::Bool, &v),
        }
    }

    pub fn get_int(&self, name: &str) -> i64 {
        match self.lookup(name).get() {
            Value::Int(v) => v,
            v => Self::mismatch(name, Kind::Int, &v),
        }
    }

    pub fn get_double(&self, name: &str) -> f64 {
        match self.lookup(name).get() {
            Value::Double(v) => v,
            v => Self::mismatch(name, Kind::Double, &v),
        }
    }

    pub fn get_string(&self, name: &str) -> String {
        match self.lookup(name).get() {
            Value::String(v) => v,
            v => Self::mismatch(name, Kind::String, &v),
        }
    }

    /// Update a parameter value.
    ///
    /// Fails if the parameter does not exist or `value` does not match its type.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let param = self
            .params
            .get(name)
            .ok_or_else(|| anyhow!("unknown parameter \"{name}\""))?;

        let value = value.into();
        let got = value.kind();

        let value = value
            .coerce(param.kind)
            .ok_or_else(|| anyhow!("parameter \"{name}\" is {:?}, got {got:?}", param.kind))?;

        param.set(value);

        Ok(())
    }

    /// Update a parameter from its textual representation.
    pub fn set_from_str(&self, name: &str, text: &str) -> Result<()> {
        let param = self
            .params
            .get(name)
            .ok_or_else(|| anyhow!("unknown parameter \"{name}\""))?;

        let text = text.trim();

        let value = match param.kind {
            Kind::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Value::Bool(true),
                "false" | "0" | "no" | "off" => Value::Bool(false),
                _ => bail!("\"{text}\" is not a boolean (parameter \"{name}\")"),
            },
            Kind::Int => Value::Int(
                text.parse()
                    .with_context(|| format!("parameter \"{name}\" expects an integer"))?,
            ),
            Kind::Double => Value::Double(
                text.parse()
                    .with_context(|| format!("parameter \"{name}\" expects a number"))?,
            ),
            Kind::String => Value::String(text.to_string()),
        };

        param.set(value);

        Ok(())
    }

    /// Apply a batch of overrides, e.g. from a configuration file.
    pub fn apply_overrides<'a>(
        &self,
        overrides: impl IntoIterator<Item = (&'a String, &'a Value)>,
    ) -> Result<()> {
        for (name, value) in overrides {
            self.set(name, value.clone())?;
        }
        Ok(())
    }

    /// List `(name, description, value)` of every parameter, ordered by name.
    pub fn list(&self) -> Vec<(&str, &str, Value)> {
        self.params
            .iter()
            .map(|(n, p)| (n.as_str(), p.descr(), p.get()))
            .collect()
    }
}

pub const NOISE_FACTOR: &str = "noise-factor";
pub const MIN_PIXELS_CHANGED: &str = "min-pixels-changed-percentage";
pub const MAX_PIXELS_CHANGED: &str = "max-pixels-changed-percentage";
pub const PAN_TILT: &str = "pan-tilt";
pub const REMEMBER_TRIGGER: &str = "remember-trigger";
pub const DESPECKLE_FILTER: &str = "despeckle-filter";
pub const MIN_DURATION: &str = "min-duration";
pub const MUTE_DURATION: &str = "mute-duration";
pub const MIN_N_FRAMES: &str = "min-n-frames";
pub const PRE_RECORD_DURATION: &str = "pre-motion-record-duration";
pub const MAX_FPS: &str = "max-fps";

/// Parameters of a frame differencing motion trigger, with their default values.
pub fn motion_defaults() -> ParameterSet {
    ParameterSet::new()
        .with(
            NOISE_FACTOR,
            "luma difference at which a pixel counts as changed",
            32,
        )
        .with(
            MIN_PIXELS_CHANGED,
            "percentage of changed pixels above which motion is detected",
            1.0,
        )
        .with(
            MAX_PIXELS_CHANGED,
            "percentage of changed pixels below which motion is detected",
            100.0,
        )
        .with(PAN_TILT, "steer pan/tilt towards the detected motion", false)
        .with(
            REMEMBER_TRIGGER,
            "meta key to store the triggering frame under",
            "",
        )
        .with(
            DESPECKLE_FILTER,
            "dilate/erode pattern applied to the change map (d, e, D, E)",
            "",
        )
        .with(
            MIN_DURATION,
            "number of quiet frames before a recording is stopped",
            5,
        )
        .with(
            MUTE_DURATION,
            "number of frames to ignore motion after a recording stopped",
            5,
        )
        .with(
            MIN_N_FRAMES,
            "number of consecutive frames with motion needed to start recording",
            1,
        )
        .with(
            PRE_RECORD_DURATION,
            "number of frames to keep from before the trigger",
            10,
        )
        .with(MAX_FPS, "limit the processing frame rate (-1 = unlimited)", -1.0)
}

/// Parameters of a cascading trigger, with their default values.
pub fn cascade_defaults() -> ParameterSet {
    ParameterSet::new().with(
        PRE_RECORD_DURATION,
        "number of frames to keep from before the trigger",
        0,
    )
}
