//! Coercion helpers over [`serde_json::Value`], mirroring the socket compatibility rules:
//! what can be wired can also be converted, value-level, at the moment a connection is resolved.

use crate::data_type::DataType;
use serde_json::Value;

pub type JsonObject = serde_json::Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("cannot interpret {found} as {expected}")]
pub struct CoerceError {
	pub expected: DataType,
	pub found: &'static str,
}

impl CoerceError {
	fn new(expected: DataType, value: &Value) -> Self {
		Self { expected, found: kind_name(value) }
	}
}

fn kind_name(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}

/// Build a JSON number, collapsing NaN and infinities (unrepresentable in JSON) to zero.
pub fn float_value(value: f64) -> Value {
	serde_json::Number::from_f64(value).map(Value::Number).unwrap_or(Value::Number(0.into()))
}

pub fn vector_value(components: &[f64]) -> Value {
	Value::Array(components.iter().map(|&component| float_value(component)).collect())
}

pub fn coerce_float(value: &Value) -> Result<f64, CoerceError> {
	value.as_f64().ok_or_else(|| CoerceError::new(DataType::Float, value))
}

pub fn coerce_int(value: &Value) -> Result<i64, CoerceError> {
	if let Some(int) = value.as_i64() {
		return Ok(int);
	}
	value.as_f64().map(|float| float.round() as i64).ok_or_else(|| CoerceError::new(DataType::Int, value))
}

pub fn coerce_bool(value: &Value) -> Result<bool, CoerceError> {
	value.as_bool().ok_or_else(|| CoerceError::new(DataType::Bool, value))
}

pub fn coerce_string(value: &Value) -> Result<String, CoerceError> {
	value.as_str().map(str::to_string).ok_or_else(|| CoerceError::new(DataType::String, value))
}

/// Resolve a value to exactly `count` scalar components: numbers broadcast, arrays are
/// truncated or zero-padded.
pub fn coerce_components(value: &Value, count: usize, expected: DataType) -> Result<Vec<f64>, CoerceError> {
	match value {
		Value::Number(number) => {
			let scalar = number.as_f64().ok_or_else(|| CoerceError::new(expected, value))?;
			Ok(vec![scalar; count])
		}
		Value::Array(items) => {
			let mut components = Vec::with_capacity(count);
			for item in items.iter().take(count) {
				components.push(item.as_f64().ok_or_else(|| CoerceError::new(expected, value))?);
			}
			components.resize(count, 0.);
			Ok(components)
		}
		_ => Err(CoerceError::new(expected, value)),
	}
}

pub fn coerce_vec2(value: &Value) -> Result<[f64; 2], CoerceError> {
	let components = coerce_components(value, 2, DataType::Vec2)?;
	Ok([components[0], components[1]])
}

pub fn coerce_vec3(value: &Value) -> Result<[f64; 3], CoerceError> {
	let components = coerce_components(value, 3, DataType::Vec3)?;
	Ok([components[0], components[1], components[2]])
}

pub fn coerce_vec4(value: &Value) -> Result<[f64; 4], CoerceError> {
	let components = coerce_components(value, 4, DataType::Vec4)?;
	Ok([components[0], components[1], components[2], components[3]])
}

/// Colors are RGBA. A three-component source gains alpha = 1; anything longer is truncated.
pub fn coerce_color(value: &Value) -> Result<[f64; 4], CoerceError> {
	let Value::Array(items) = value else {
		return Err(CoerceError::new(DataType::Color, value));
	};
	let mut components = Vec::with_capacity(4);
	for item in items.iter().take(4) {
		components.push(item.as_f64().ok_or_else(|| CoerceError::new(DataType::Color, value))?);
	}
	if components.len() == 3 {
		components.push(1.);
	}
	components.resize(4, 0.);
	Ok([components[0], components[1], components[2], components[3]])
}

/// Convert a value into the canonical JSON shape of `to`. `Any` and `texture` pass through
/// untouched; they are opaque to the graph core.
pub fn convert(value: &Value, to: DataType) -> Result<Value, CoerceError> {
	match to {
		DataType::Float => coerce_float(value).map(float_value),
		DataType::Int => coerce_int(value).map(|int| Value::Number(int.into())),
		DataType::Bool => coerce_bool(value).map(Value::Bool),
		DataType::String => coerce_string(value).map(Value::String),
		DataType::Vec2 => coerce_vec2(value).map(|components| vector_value(&components)),
		DataType::Vec3 => coerce_vec3(value).map(|components| vector_value(&components)),
		DataType::Vec4 => coerce_vec4(value).map(|components| vector_value(&components)),
		DataType::Color => coerce_color(value).map(|components| vector_value(&components)),
		DataType::Texture | DataType::Any => Ok(value.clone()),
	}
}

/// The value an unwired, defaultless socket evaluates to.
pub fn zero_value(data_type: DataType) -> Value {
	match data_type {
		DataType::Float => float_value(0.),
		DataType::Int => Value::Number(0.into()),
		DataType::Bool => Value::Bool(false),
		DataType::Vec2 => vector_value(&[0.; 2]),
		DataType::Vec3 => vector_value(&[0.; 3]),
		DataType::Vec4 => vector_value(&[0.; 4]),
		DataType::Color => vector_value(&[0., 0., 0., 1.]),
		DataType::String => Value::String(String::new()),
		DataType::Texture | DataType::Any => Value::Null,
	}
}
