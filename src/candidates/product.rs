//! Cartesian products and the order candidates are drawn from them in.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Odometer over the cartesian product of several lists.
///
/// Yields index-aligned picks, last list varying fastest. A product over no
/// lists yields one empty combination; any empty list yields nothing.
pub(crate) struct Product<'a, T> {
    lists: Vec<&'a [T]>,
    indices: Vec<usize>,
    done: bool,
}

impl<'a, T> Product<'a, T> {
    pub(crate) fn new(lists: Vec<&'a [T]>) -> Self {
        let done = lists.iter().any(|list| list.is_empty());
        let indices = vec![0; lists.len()];
        Self {
            lists,
            indices,
            done,
        }
    }

    fn advance(&mut self) {
        for position in (0..self.indices.len()).rev() {
            self.indices[position] += 1;
            if self.indices[position] < self.lists[position].len() {
                return;
            }
            self.indices[position] = 0;
        }
        self.done = true;
    }
}

impl<'a, T> Iterator for Product<'a, T> {
    type Item = Vec<&'a T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let pick = self
            .indices
            .iter()
            .zip(&self.lists)
            .map(|(index, list)| &list[*index])
            .collect();
        self.advance();
        Some(pick)
    }
}

/// Order in which candidates are drawn from the per-tree products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationStrategy {
    /// Exhaust each tree before moving on to the next.
    #[default]
    DepthFirst,
    /// Take one candidate from each tree in turn.
    BreadthFirst,
}

/// Draws items from several iterators according to a [`GenerationStrategy`].
pub(crate) struct Interleave<I> {
    sources: VecDeque<I>,
    strategy: GenerationStrategy,
}

impl<I: Iterator> Interleave<I> {
    pub(crate) fn new(sources: Vec<I>, strategy: GenerationStrategy) -> Self {
        Self {
            sources: sources.into(),
            strategy,
        }
    }
}

impl<I: Iterator> Iterator for Interleave<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(mut source) = self.sources.pop_front() {
            if let Some(item) = source.next() {
                match self.strategy {
                    GenerationStrategy::DepthFirst => self.sources.push_front(source),
                    GenerationStrategy::BreadthFirst => self.sources.push_back(source),
                }
                return Some(item);
            }
        }
        None
    }
}
