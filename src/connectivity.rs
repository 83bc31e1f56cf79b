//! Cell connectivities, i.e. the global vertex indices of individual elements.
//!
//! The element types constructed from each connectivity live in [`crate::element`].
use serde::{Deserialize, Serialize};

/// Connectivity for a two-dimensional Tri3 element.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Tri3Connectivity(pub [usize; 3]);

/// Connectivity for a two-dimensional Quad4 element.
///
/// Vertices are ordered counter-clockwise.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Quad4Connectivity(pub [usize; 4]);

/// Connectivity for a Tet4 element.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Tet4Connectivity(pub [usize; 4]);

/// Connectivity for a Hex8 element.
///
/// The first four vertices form the bottom face in counter-clockwise order (seen from above),
/// the last four vertices the top face in the same order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Hex8Connectivity(pub [usize; 8]);
