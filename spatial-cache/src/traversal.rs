//! Range queries over any node tree reachable through a [`NodeSource`].
//!
//! Traversal is iterative: an explicit stack holds each resident node along
//! with the position of the next child to try, so depth never touches the
//! call stack. Visited state lives in a set local to the call.

use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::{CacheError, CacheResult};
use crate::node::{DataEntry, Node, NodeId};
use crate::region::Region;

/// How data entries are matched against the query region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    /// Entries lying entirely inside the query.
    Containment,
    /// Entries sharing at least one point with the query.
    Intersection,
}

impl QueryKind {
    fn matches(self, query: &Region, shape: &Region) -> bool {
        match self {
            QueryKind::Containment => query.contains(shape),
            QueryKind::Intersection => shape.intersects(query),
        }
    }
}

/// Callbacks invoked during a traversal.
pub trait Visitor<P> {
    /// Called once per visited node, before its entries are scanned.
    fn visit_node(&mut self, _node: &Node<P>) {}

    /// Called for every matching entry.
    fn visit_data(&mut self, entry: &DataEntry<P>);

    /// Whether entries should be scanned at all.
    fn is_data_visitor(&self) -> bool {
        true
    }
}

/// A tree the traversal can walk.
pub trait NodeSource<P> {
    fn dimension(&self) -> usize;

    /// The resident root.
    fn root(&self) -> Arc<Node<P>>;

    /// Loads a non-root node. `Ok(None)` means the node does not exist,
    /// which is normal for tiles never written or already evicted.
    fn read_node(&mut self, id: &NodeId) -> CacheResult<Option<Arc<Node<P>>>>;
}

/// Collects clones of matching entries and counts visited nodes.
#[derive(Debug)]
pub struct Collector<P> {
    pub entries: Vec<DataEntry<P>>,
    pub nodes_visited: usize,
}

impl<P> Default for Collector<P> {
    fn default() -> Self {
        Collector {
            entries: Vec::new(),
            nodes_visited: 0,
        }
    }
}

impl<P> Collector<P> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: Clone> Visitor<P> for Collector<P> {
    fn visit_node(&mut self, _node: &Node<P>) {
        self.nodes_visited += 1;
    }

    fn visit_data(&mut self, entry: &DataEntry<P>) {
        self.entries.push(entry.clone());
    }
}

/// Counts visited nodes without scanning entries.
#[derive(Debug, Default)]
pub struct NodeCounter {
    pub nodes_visited: usize,
    pub nodes: Vec<NodeId>,
}

impl<P> Visitor<P> for NodeCounter {
    fn visit_node(&mut self, node: &Node<P>) {
        self.nodes_visited += 1;
        self.nodes.push(node.id().clone());
    }

    fn visit_data(&mut self, _entry: &DataEntry<P>) {}

    fn is_data_visitor(&self) -> bool {
        false
    }
}

/// Reports every entry intersecting `query`.
pub fn intersection_query<P, S, V>(source: &mut S, query: &Region, visitor: &mut V) -> CacheResult<()>
where
    S: NodeSource<P> + ?Sized,
    V: Visitor<P> + ?Sized,
{
    check_dimension(source, query, "intersection_query")?;
    range_query(source, query, QueryKind::Intersection, visitor)
}

/// Reports every entry lying inside `query`.
pub fn containment_query<P, S, V>(source: &mut S, query: &Region, visitor: &mut V) -> CacheResult<()>
where
    S: NodeSource<P> + ?Sized,
    V: Visitor<P> + ?Sized,
{
    check_dimension(source, query, "containment_query")?;
    range_query(source, query, QueryKind::Containment, visitor)
}

/// Reports every entry containing `point`.
pub fn point_location_query<P, S, V>(source: &mut S, point: &[f64], visitor: &mut V) -> CacheResult<()>
where
    S: NodeSource<P> + ?Sized,
    V: Visitor<P> + ?Sized,
{
    let query = Region::point(point)?;
    check_dimension(source, &query, "point_location_query")?;
    range_query(source, &query, QueryKind::Intersection, visitor)
}

fn check_dimension<P, S>(source: &S, query: &Region, operation: &str) -> CacheResult<()>
where
    S: NodeSource<P> + ?Sized,
{
    if query.dimension() != source.dimension() {
        return Err(CacheError::dimension_mismatch(
            operation,
            source.dimension(),
            query.dimension(),
        ));
    }
    Ok(())
}

/// Depth-first range query from the root.
///
/// The query dimension must already match the source.
pub fn range_query<P, S, V>(
    source: &mut S,
    query: &Region,
    kind: QueryKind,
    visitor: &mut V,
) -> CacheResult<()>
where
    S: NodeSource<P> + ?Sized,
    V: Visitor<P> + ?Sized,
{
    let root = source.root();
    if !root.region().intersects(query) {
        return Ok(());
    }

    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<(Arc<Node<P>>, usize)> = vec![(root, 0)];

    while let Some((node, mut next)) = stack.pop() {
        if visited.insert(node.id().clone()) {
            visitor.visit_node(&node);
            if visitor.is_data_visitor() {
                for entry in node.entries() {
                    if kind.matches(query, &entry.shape) {
                        visitor.visit_data(entry);
                    }
                }
            }
        }

        let mut descend = None;
        while next < node.children().len() {
            let child = &node.children()[next];
            next += 1;
            if visited.contains(child) {
                continue;
            }
            if !child.region().intersects(query) {
                visited.insert(child.clone());
                continue;
            }
            match source.read_node(child)? {
                Some(loaded) => {
                    descend = Some(loaded);
                    break;
                }
                None => {
                    visited.insert(child.clone());
                }
            }
        }

        if let Some(child) = descend {
            stack.push((node, next));
            stack.push((child, 0));
        }
    }
    Ok(())
}
