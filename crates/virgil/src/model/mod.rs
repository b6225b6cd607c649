// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed parameter tree for a slave device.
//!
//! Holds the device-level fields plus one parameter map per channel, and
//! mediates every read and write. Validation runs per parameter in a
//! fixed order (exists, unlocked, type, range/enum) and commits
//! independently: later failures in a batch never roll back earlier
//! successes.
//!
//! The tree is owned by the slave runtime behind a single writer lock;
//! nothing here touches sockets.

use crate::config::PROTOCOL_VERSION;
use crate::error::{Error, Result};
use crate::identity::{DeviceType, MulticastBase};
use crate::protocol::ErrorValue;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub mod profiles;
mod value;

pub use value::{NumberSpec, ParamKind, ParamValue};

/// Canonical continuous-telemetry parameters. Channels may declare more
/// via [`Parameter::continuous`].
pub const CONTINUOUS_PARAMETERS: [&str; 3] = ["audioLevel", "rfLevel", "batteryLevel"];

/// A typed, validated, optionally-locked unit of state.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub kind: ParamKind,
    pub value: ParamValue,
    /// Locked parameters reject inbound writes; only the slave itself
    /// updates them (sensor sampling).
    pub locked: bool,
    /// Included in the periodic telemetry stream.
    pub continuous: bool,
    /// Opaque auxiliary constants carried verbatim in descriptors
    /// (e.g. `padLevel` on `pad`).
    pub aux: Map<String, Value>,
}

impl Parameter {
    #[must_use]
    pub fn number(value: f64, spec: NumberSpec) -> Self {
        Self {
            kind: ParamKind::Number(spec),
            value: ParamValue::Number(value),
            locked: false,
            continuous: false,
            aux: Map::new(),
        }
    }

    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self {
            kind: ParamKind::Bool,
            value: ParamValue::Bool(value),
            locked: false,
            continuous: false,
            aux: Map::new(),
        }
    }

    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            kind: ParamKind::Text,
            value: ParamValue::Text(value.into()),
            locked: false,
            continuous: false,
            aux: Map::new(),
        }
    }

    #[must_use]
    pub fn enumeration(value: impl Into<String>, values: &[&str]) -> Self {
        Self {
            kind: ParamKind::Enum(values.iter().map(|s| (*s).to_string()).collect()),
            value: ParamValue::Text(value.into()),
            locked: false,
            continuous: false,
            aux: Map::new(),
        }
    }

    #[must_use]
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    #[must_use]
    pub fn continuous(mut self) -> Self {
        self.continuous = true;
        self
    }

    #[must_use]
    pub fn with_aux(mut self, key: &str, value: Value) -> Self {
        self.aux.insert(key.to_string(), value);
        self
    }

    /// Full wire descriptor: `dataType`, `value`, `locked`, the numeric or
    /// enum constraints, plus auxiliary constants.
    #[must_use]
    pub fn descriptor(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("dataType".to_string(), Value::String(self.kind.data_type().to_string()));
        map.insert("value".to_string(), self.value.to_json());
        map.insert("locked".to_string(), Value::Bool(self.locked));
        match &self.kind {
            ParamKind::Number(spec) => {
                if let Some(unit) = &spec.unit {
                    map.insert("unit".to_string(), Value::String(unit.clone()));
                }
                if let Some(precision) = spec.precision {
                    map.insert("precision".to_string(), serde_json::json!(precision));
                }
                map.insert("minValue".to_string(), serde_json::json!(spec.min_value));
                map.insert("maxValue".to_string(), serde_json::json!(spec.max_value));
            }
            ParamKind::Enum(values) => {
                map.insert(
                    "enumValues".to_string(),
                    Value::Array(values.iter().map(|v| Value::String(v.clone())).collect()),
                );
            }
            ParamKind::Bool | ParamKind::Text => {}
        }
        for (k, v) in &self.aux {
            map.insert(k.clone(), v.clone());
        }
        map
    }

    /// Validate a proposed raw value against lock, type, and constraints.
    ///
    /// Order: locked, runtime type, range + precision grid (numbers) or
    /// membership (enums). Precision violations report `ValueOutOfRange`.
    fn check_proposed(&self, name: &str, raw: &Value) -> std::result::Result<ParamValue, ParamRejection> {
        let reject = |error, detail: String| ParamRejection {
            name: name.to_string(),
            error,
            detail,
        };

        if self.locked {
            return Err(reject(
                ErrorValue::ParameterLocked,
                format!("Parameter '{}' is locked", name),
            ));
        }

        match &self.kind {
            ParamKind::Number(spec) => {
                let Some(v) = raw.as_f64() else {
                    return Err(reject(
                        ErrorValue::InvalidValueType,
                        format!("Parameter '{}' expects a number", name),
                    ));
                };
                if !spec.contains(v) {
                    return Err(reject(
                        ErrorValue::ValueOutOfRange,
                        format!(
                            "Parameter '{}' value {} is out of range [{}, {}]",
                            name, v, spec.min_value, spec.max_value
                        ),
                    ));
                }
                if !spec.on_grid(v) {
                    return Err(reject(
                        ErrorValue::ValueOutOfRange,
                        format!(
                            "Parameter '{}' value {} is not aligned to precision {}",
                            name,
                            v,
                            spec.precision.unwrap_or(0.0)
                        ),
                    ));
                }
                Ok(ParamValue::Number(v))
            }
            ParamKind::Bool => raw.as_bool().map(ParamValue::Bool).ok_or_else(|| {
                reject(
                    ErrorValue::InvalidValueType,
                    format!("Parameter '{}' expects a boolean", name),
                )
            }),
            ParamKind::Text => raw
                .as_str()
                .map(|s| ParamValue::Text(s.to_string()))
                .ok_or_else(|| {
                    reject(
                        ErrorValue::InvalidValueType,
                        format!("Parameter '{}' expects a string", name),
                    )
                }),
            ParamKind::Enum(values) => {
                let Some(s) = raw.as_str() else {
                    return Err(reject(
                        ErrorValue::InvalidValueType,
                        format!("Parameter '{}' expects an enum string", name),
                    ));
                };
                if !values.iter().any(|v| v == s) {
                    return Err(reject(
                        ErrorValue::ValueOutOfRange,
                        format!("Parameter '{}' has no enum value '{}'", name, s),
                    ));
                }
                Ok(ParamValue::Text(s.to_string()))
            }
        }
    }
}

/// Parameter map of one channel. The set is fixed for the device's
/// lifetime; only values change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Channel {
    params: BTreeMap<String, Parameter>,
}

impl Channel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter. Canonical continuous names are flagged
    /// automatically.
    pub fn insert(&mut self, name: &str, mut param: Parameter) {
        if CONTINUOUS_PARAMETERS.contains(&name) {
            param.continuous = true;
        }
        self.params.insert(name.to_string(), param);
    }

    /// Builder-style [`Channel::insert`].
    #[must_use]
    pub fn with(mut self, name: &str, param: Parameter) -> Self {
        self.insert(name, param);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Parameter)> {
        self.params.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Name -> full descriptor map for `ParameterResponse` payloads.
    #[must_use]
    pub fn descriptor_map(&self) -> Map<String, Value> {
        self.params
            .iter()
            .map(|(name, param)| (name.clone(), Value::Object(param.descriptor())))
            .collect()
    }

    /// Name -> raw current value for every continuous parameter.
    #[must_use]
    pub fn continuous_values(&self) -> Map<String, Value> {
        self.params
            .iter()
            .filter(|(_, p)| p.continuous)
            .map(|(name, p)| (name.clone(), p.value.to_json()))
            .collect()
    }
}

/// One rejected parameter within a command.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamRejection {
    pub name: String,
    pub error: ErrorValue,
    pub detail: String,
}

/// Result of applying one `ParameterCommand` to one channel.
///
/// Both lists preserve the order the changes were examined in; accepted
/// changes are already committed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutcome {
    pub accepted: Vec<(String, ParamValue)>,
    pub rejected: Vec<ParamRejection>,
}

/// The slave's full state: identity plus channels.
#[derive(Debug, Clone)]
pub struct DeviceState {
    device_name: String,
    model: String,
    device_type: DeviceType,
    multicast_base: MulticastBase,
    channels: BTreeMap<i32, Channel>,
}

impl DeviceState {
    pub fn new(
        device_name: impl Into<String>,
        model: impl Into<String>,
        device_type: DeviceType,
        multicast_base: MulticastBase,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            model: model.into(),
            device_type,
            multicast_base,
            channels: BTreeMap::new(),
        }
    }

    /// Register a channel. Indices must be unique and non-negative.
    pub fn add_channel(&mut self, index: i32, channel: Channel) -> Result<()> {
        if index < 0 {
            return Err(Error::InvalidConfig(format!(
                "channel index must be non-negative, got {}",
                index
            )));
        }
        if self.channels.contains_key(&index) {
            return Err(Error::InvalidConfig(format!("duplicate channel index {}", index)));
        }
        self.channels.insert(index, channel);
        Ok(())
    }

    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    #[must_use]
    pub fn multicast_base(&self) -> MulticastBase {
        self.multicast_base
    }

    /// Monotone list of real channel indices.
    #[must_use]
    pub fn channel_indices(&self) -> Vec<i32> {
        self.channels.keys().copied().collect()
    }

    #[must_use]
    pub fn channel(&self, index: i32) -> Option<&Channel> {
        self.channels.get(&index)
    }

    /// Device-level fields for a `channelIndex == -1` response.
    #[must_use]
    pub fn device_info(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("model".to_string(), Value::String(self.model.clone()));
        map.insert(
            "deviceType".to_string(),
            Value::String(self.device_type.as_str().to_string()),
        );
        map.insert(
            "protocolVersion".to_string(),
            Value::String(PROTOCOL_VERSION.to_string()),
        );
        map.insert(
            "multicastBase".to_string(),
            Value::String(self.multicast_base.to_string()),
        );
        map.insert(
            "channelIndices".to_string(),
            Value::Array(self.channel_indices().iter().map(|i| serde_json::json!(i)).collect()),
        );
        map
    }

    /// Full parameter descriptors for one channel.
    #[must_use]
    pub fn channel_descriptor(&self, index: i32) -> Option<Map<String, Value>> {
        self.channels.get(&index).map(Channel::descriptor_map)
    }

    /// Apply a set of proposed values to one channel.
    ///
    /// `changes` maps parameter name to the proposed raw value (the inner
    /// `value` of the nested command form). Each pair validates and
    /// commits independently.
    pub fn apply_command(&mut self, index: i32, changes: &Map<String, Value>) -> Result<CommandOutcome> {
        let channel = self
            .channels
            .get_mut(&index)
            .ok_or(Error::UnknownChannel(index))?;

        let mut outcome = CommandOutcome::default();
        for (name, raw) in changes {
            let Some(param) = channel.params.get_mut(name) else {
                outcome.rejected.push(ParamRejection {
                    name: name.clone(),
                    error: ErrorValue::ParameterUnsupported,
                    detail: format!("Device does not have parameter '{}'", name),
                });
                continue;
            };
            match param.check_proposed(name, raw) {
                Ok(value) => {
                    param.value = value.clone();
                    outcome.accepted.push((name.clone(), value));
                }
                Err(rejection) => outcome.rejected.push(rejection),
            }
        }
        Ok(outcome)
    }

    /// Slave-internal sensor write for continuous parameters.
    ///
    /// Bypasses the lock (locked sensor values are owned by the slave),
    /// but keeps numeric invariants: values are clamped into bounds and
    /// snapped onto the precision grid.
    pub fn set_continuous(&mut self, index: i32, name: &str, value: ParamValue) -> Result<()> {
        let channel = self
            .channels
            .get_mut(&index)
            .ok_or(Error::UnknownChannel(index))?;
        let param = channel
            .params
            .get_mut(name)
            .ok_or_else(|| Error::InvalidState(format!("no parameter '{}' on channel {}", name, index)))?;
        if !param.continuous {
            return Err(Error::InvalidState(format!(
                "parameter '{}' is not continuous",
                name
            )));
        }

        match (&param.kind, value) {
            (ParamKind::Number(spec), ParamValue::Number(v)) => {
                param.value = ParamValue::Number(spec.normalize(v));
            }
            (ParamKind::Bool, ParamValue::Bool(b)) => {
                param.value = ParamValue::Bool(b);
            }
            (ParamKind::Text | ParamKind::Enum(_), ParamValue::Text(s)) => {
                param.value = ParamValue::Text(s);
            }
            (kind, value) => {
                return Err(Error::InvalidState(format!(
                    "parameter '{}' ({}) cannot take {:?}",
                    name,
                    kind.data_type(),
                    value
                )));
            }
        }
        Ok(())
    }
}
