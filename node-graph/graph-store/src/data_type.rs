use std::fmt;

/// The type carried by a socket. `Any` defers to the opposite endpoint of a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
	#[default]
	Float,
	Int,
	Bool,
	Vec2,
	Vec3,
	Vec4,
	Color,
	Texture,
	String,
	Any,
}

impl DataType {
	/// Number of scalar components, for the vector-shaped types.
	pub fn component_count(self) -> Option<usize> {
		match self {
			DataType::Vec2 => Some(2),
			DataType::Vec3 => Some(3),
			DataType::Vec4 => Some(4),
			DataType::Color => Some(4),
			_ => None,
		}
	}

	pub fn is_vector(self) -> bool {
		matches!(self, DataType::Vec2 | DataType::Vec3 | DataType::Vec4)
	}

	/// Whether an output of type `from` may be wired into an input of type `to`.
	///
	/// Equal types always connect. `Any` connects to everything. The remaining pairs are
	/// the scalar promotion set: `int ↔ float`, `float → vecN` (scalar broadcast),
	/// `vecN ↔ vecM` (swizzle or pad with zeros), and `color ↔ vec3/vec4`.
	pub fn compatible(from: DataType, to: DataType) -> bool {
		if from == to || from == DataType::Any || to == DataType::Any {
			return true;
		}
		match (from, to) {
			(DataType::Int, DataType::Float) | (DataType::Float, DataType::Int) => true,
			(DataType::Float, to) if to.is_vector() => true,
			(from, to) if from.is_vector() && to.is_vector() => true,
			(DataType::Color, DataType::Vec3 | DataType::Vec4) => true,
			(DataType::Vec3 | DataType::Vec4, DataType::Color) => true,
			_ => false,
		}
	}

	/// The type a connection carries once resolved. `Color` on either side wins so that
	/// alpha handling survives a trip through a `vec3`/`vec4` socket; otherwise the input
	/// side decides. `Any` resolves to the concrete endpoint, and a fully generic
	/// connection falls back to `float`.
	pub fn carried(from: DataType, to: DataType) -> DataType {
		if from == DataType::Color || to == DataType::Color {
			return DataType::Color;
		}
		match (from, to) {
			(DataType::Any, DataType::Any) => DataType::Float,
			(from, DataType::Any) => from,
			(_, to) => to,
		}
	}
}

impl fmt::Display for DataType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			DataType::Float => "float",
			DataType::Int => "int",
			DataType::Bool => "bool",
			DataType::Vec2 => "vec2",
			DataType::Vec3 => "vec3",
			DataType::Vec4 => "vec4",
			DataType::Color => "color",
			DataType::Texture => "texture",
			DataType::String => "string",
			DataType::Any => "any",
		};
		f.write_str(name)
	}
}
