//! Distribution of mesh nodes and elements over the ranks of a communicator.
use crate::allocators::DimAllocator;
use crate::element::ElementConnectivity;
use crate::mesh::Mesh;
use crate::vector::DofLayout;
use crate::SmallDim;
use itertools::Itertools;
use nalgebra::DefaultAllocator;
use std::ops::Range;
use std::sync::Arc;

/// The part of a mesh that is local to a single rank.
///
/// Nodes are distributed in contiguous blocks: rank `r` of `p` owns nodes
/// `n * r / p .. n * (r + 1) / p`. Each element is assigned to the rank that owns its
/// lowest-numbered vertex, so that every element is integrated on exactly one rank.
/// Nodes referenced by local elements but owned by other ranks are *ghost* nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshPartition {
    rank: usize,
    size: usize,
    num_nodes: usize,
    owned_nodes: Range<usize>,
    local_elements: Vec<usize>,
    ghost_nodes: Vec<usize>,
}

/// Returns the block of `n` items owned by `rank` out of `size`.
pub fn block_range(n: usize, rank: usize, size: usize) -> Range<usize> {
    assert!(rank < size, "Rank must be smaller than the number of ranks.");
    (n * rank / size)..(n * (rank + 1) / size)
}

impl MeshPartition {
    pub fn from_mesh<D, C>(mesh: &Mesh<D, C>, rank: usize, size: usize) -> Self
    where
        D: SmallDim,
        C: ElementConnectivity<GeometryDim = D>,
        DefaultAllocator: DimAllocator<D>,
    {
        let num_nodes = mesh.num_vertices();
        let owned_nodes = block_range(num_nodes, rank, size);

        let local_elements: Vec<usize> = mesh
            .connectivity()
            .iter()
            .enumerate()
            .filter(|(_, conn)| {
                conn.vertex_indices()
                    .iter()
                    .min()
                    .map_or(false, |first| owned_nodes.contains(first))
            })
            .map(|(index, _)| index)
            .collect();

        let ghost_nodes = local_elements
            .iter()
            .flat_map(|&index| mesh.connectivity()[index].vertex_indices().iter().copied())
            .filter(|node| !owned_nodes.contains(node))
            .sorted_unstable()
            .dedup()
            .collect();

        Self {
            rank,
            size,
            num_nodes,
            owned_nodes,
            local_elements,
            ghost_nodes,
        }
    }

    /// The partition of a mesh that lives entirely on a single rank.
    pub fn serial<D, C>(mesh: &Mesh<D, C>) -> Self
    where
        D: SmallDim,
        C: ElementConnectivity<GeometryDim = D>,
        DefaultAllocator: DimAllocator<D>,
    {
        Self::from_mesh(mesh, 0, 1)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn owned_nodes(&self) -> Range<usize> {
        self.owned_nodes.clone()
    }

    /// Indices of the elements integrated on this rank.
    pub fn local_elements(&self) -> &[usize] {
        &self.local_elements
    }

    /// Sorted indices of the ghost nodes of this rank.
    pub fn ghost_nodes(&self) -> &[usize] {
        &self.ghost_nodes
    }

    /// The layout of a node-interleaved vector with `block_size` values per node, i.e. the value
    /// `d` of node `n` is stored at global index `n * block_size + d`.
    pub fn dof_layout(&self, block_size: usize) -> Arc<DofLayout> {
        let owned = (self.owned_nodes.start * block_size)..(self.owned_nodes.end * block_size);
        let ghosts = self
            .ghost_nodes
            .iter()
            .flat_map(|&node| (0..block_size).map(move |d| node * block_size + d))
            .collect();
        Arc::new(DofLayout::new(self.num_nodes * block_size, owned, ghosts, block_size))
    }
}
