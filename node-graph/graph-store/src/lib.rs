//! The in-memory graph model: identifiers, socket data types, the entity store with its
//! validation rules, the node catalog, and the versioned document codec.

pub mod catalog;
pub mod data_type;
pub mod document;
pub mod error;
pub mod graph;
pub mod id;
pub mod migration;
pub mod subgraph;
pub mod value;

pub use data_type::DataType;
pub use error::{DocumentError, InternalError, ValidationError};
pub use graph::{Direction, Frame, Graph, Node, Socket, Wire};
pub use id::{FrameId, GraphId, IdGenerator, NodeId, SocketId, WireId};
pub use value::JsonObject;
