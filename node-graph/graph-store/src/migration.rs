//! Upgrades raw document JSON from any historical schema version to [`DOCUMENT_VERSION`].
//! Each step migrates exactly one version; loading runs every applicable step in order, then
//! recurses into embedded subgraph definitions.

use crate::catalog::SUBGRAPH_NODE_TYPE;
use crate::document::DOCUMENT_VERSION;
use crate::error::DocumentError;
use serde_json::{Value, json};

type MigrationFn = fn(&mut Value);

const MIGRATIONS: &[(u32, MigrationFn)] = &[
	// Version 1 predates frames.
	(1, migrate_add_frames),
	// Version 2 used the long data type spellings.
	(2, migrate_rename_data_types),
];

const DATA_TYPE_REPLACEMENTS: &[(&str, &str)] = &[
	("vector2", "vec2"),
	("vector3", "vec3"),
	("vector4", "vec4"),
	("rgba", "color"),
	("number", "float"),
	("integer", "int"),
	("boolean", "bool"),
];

pub fn migrate_document(document: &mut Value) -> Result<(), DocumentError> {
	let mut version = document
		.get("version")
		.and_then(Value::as_u64)
		.ok_or_else(|| DocumentError::SchemaViolation {
			reason: "document is missing a numeric `version`".to_string(),
		})? as u32;

	if version > DOCUMENT_VERSION {
		return Err(DocumentError::UnsupportedVersion {
			found: version,
			newest: DOCUMENT_VERSION,
		});
	}

	while version < DOCUMENT_VERSION {
		let Some((_, step)) = MIGRATIONS.iter().find(|(from, _)| *from == version) else {
			return Err(DocumentError::SchemaViolation {
				reason: format!("no migration registered from document version {version}"),
			});
		};
		step(document);
		version += 1;
		document["version"] = json!(version);
	}

	// Subgraph nodes embed whole documents which carry their own version.
	if let Some(nodes) = document.get_mut("nodes").and_then(Value::as_array_mut) {
		for node in nodes {
			let is_subgraph = node.get("type").and_then(Value::as_str) == Some(SUBGRAPH_NODE_TYPE);
			if !is_subgraph {
				continue;
			}
			if let Some(embedded) = node.get_mut("params").and_then(|params| params.get_mut("graph")) {
				migrate_document(embedded)?;
			}
		}
	}

	Ok(())
}

fn migrate_add_frames(document: &mut Value) {
	if document.get("frames").is_none() {
		document["frames"] = json!([]);
	}
}

fn migrate_rename_data_types(document: &mut Value) {
	let Some(nodes) = document.get_mut("nodes").and_then(Value::as_array_mut) else { return };
	for node in nodes {
		for side in ["inputs", "outputs"] {
			let Some(sockets) = node.get_mut(side).and_then(Value::as_array_mut) else { continue };
			for socket in sockets {
				let Some(data_type) = socket.get("dataType").and_then(Value::as_str) else { continue };
				if let Some((_, replacement)) = DATA_TYPE_REPLACEMENTS.iter().find(|(old, _)| *old == data_type) {
					socket["dataType"] = json!(replacement);
				}
			}
		}
	}
}
