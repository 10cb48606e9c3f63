//! 蒙皮网格：顶点、碰撞形状、碰撞体

mod body;
mod shape;
mod vertex;

pub use body::{SkinnedBone, SkinnedMeshBody};
pub use shape::{PerTriangleShape, PerVertexShape, ShapeData, SkinnedMeshShape};
pub use vertex::{Vertex, VertexPos, MAX_INFLUENCES};
