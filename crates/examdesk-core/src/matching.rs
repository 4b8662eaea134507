//! Matching-question answer model.
//!
//! Left items (premises) keep a fixed identity; right items live either in
//! the pool or in exactly one left slot. The canonical right-item order is
//! fixed when the question is loaded and decides where a released item
//! re-enters the pool.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::ValidationError;
use crate::model::{AnswerPayload, MatchPair, PublicQuestion};

/// Where a right item currently sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Pool(usize),
    Slot(String),
    Missing,
}

/// Bipartite left→right assignment with a reorderable pool.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingAnswerModel {
    lefts: Vec<String>,
    canonical: Vec<String>,
    rank: HashMap<String, usize>,
    assignments: HashMap<String, String>,
    pool: Vec<String>,
}

impl MatchingAnswerModel {
    /// Empty model whose pool starts in `canonical` order.
    pub fn new(lefts: Vec<String>, canonical: Vec<String>) -> Self {
        let rank = canonical
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Self {
            lefts,
            pool: canonical.clone(),
            canonical,
            rank,
            assignments: HashMap::new(),
        }
    }

    /// Fix the right-item order: the persisted order when it is a permutation
    /// of `rights`, otherwise a fresh shuffle.
    pub fn load<R: Rng + ?Sized>(
        lefts: Vec<String>,
        rights: Vec<String>,
        persisted: Option<&[String]>,
        rng: &mut R,
    ) -> Self {
        let order = match persisted {
            Some(order) if is_permutation(order, &rights) => order.to_vec(),
            _ => {
                let mut shuffled = rights;
                shuffled.shuffle(rng);
                shuffled
            }
        };
        Self::new(lefts, order)
    }

    /// Load from a question's premises and options.
    pub fn for_question<R: Rng + ?Sized>(
        question: &PublicQuestion,
        persisted: Option<&[String]>,
        rng: &mut R,
    ) -> Self {
        let lefts = question.premises.iter().map(|p| p.id.clone()).collect();
        let rights = question.options.iter().map(|o| o.id.clone()).collect();
        let persisted = persisted.or(question.pool_order.as_deref());
        Self::load(lefts, rights, persisted, rng)
    }

    /// Rebuild from serialized pairs; the pool is the complement of the
    /// assigned right items.
    pub fn from_pairs(
        lefts: Vec<String>,
        canonical: Vec<String>,
        pairs: &[MatchPair],
    ) -> Result<Self, ValidationError> {
        let mut seen = HashSet::new();
        for pair in pairs {
            if !seen.insert(pair.right_id.as_str()) {
                return Err(ValidationError::DuplicateMatchTarget(pair.right_id.clone()));
            }
        }
        let mut model = Self::new(lefts, canonical);
        for pair in pairs {
            model.assign(&pair.left_id, &pair.right_id)?;
        }
        Ok(model)
    }

    /// Put `right_id` into `left_id`'s slot.
    ///
    /// A right item already held by another left is moved; whatever
    /// `left_id` held before goes back to the pool.
    pub fn assign(&mut self, left_id: &str, right_id: &str) -> Result<(), ValidationError> {
        if !self.lefts.iter().any(|l| l == left_id) {
            return Err(ValidationError::UnknownMatchItem(left_id.to_string()));
        }
        if !self.rank.contains_key(right_id) {
            return Err(ValidationError::UnknownMatchItem(right_id.to_string()));
        }
        if self.assigned(left_id) == Some(right_id) {
            return Ok(());
        }

        if let Some(idx) = self.pool.iter().position(|r| r == right_id) {
            self.pool.remove(idx);
        } else if let Some(holder) = self.holder_of(right_id) {
            self.assignments.remove(&holder);
        }

        if let Some(previous) = self
            .assignments
            .insert(left_id.to_string(), right_id.to_string())
        {
            self.return_to_pool(previous);
        }
        Ok(())
    }

    /// Clear `left_id`'s slot, returning its right item to the pool.
    pub fn unassign(&mut self, left_id: &str) -> Option<String> {
        let right = self.assignments.remove(left_id)?;
        self.return_to_pool(right.clone());
        Some(right)
    }

    /// Move a pool item from one index to another. Assignments are untouched.
    pub fn reorder_pool(&mut self, from: usize, to: usize) -> Result<(), ValidationError> {
        let len = self.pool.len();
        for index in [from, to] {
            if index >= len {
                return Err(ValidationError::PoolIndexOutOfRange { index, len });
            }
        }
        let item = self.pool.remove(from);
        self.pool.insert(to, item);
        Ok(())
    }

    /// Pairs for assigned lefts, in premise order.
    pub fn pairs(&self) -> Vec<MatchPair> {
        self.lefts
            .iter()
            .filter_map(|left| {
                self.assignments
                    .get(left)
                    .map(|right| MatchPair::new(left.clone(), right.clone()))
            })
            .collect()
    }

    pub fn to_payload(&self) -> AnswerPayload {
        AnswerPayload::Match(self.pairs())
    }

    pub fn assigned(&self, left_id: &str) -> Option<&str> {
        self.assignments.get(left_id).map(String::as_str)
    }

    pub fn pool(&self) -> &[String] {
        &self.pool
    }

    pub fn lefts(&self) -> &[String] {
        &self.lefts
    }

    pub fn canonical_order(&self) -> &[String] {
        &self.canonical
    }

    /// Every premise has a right item.
    pub fn is_complete(&self) -> bool {
        self.lefts.iter().all(|l| self.assignments.contains_key(l))
    }

    pub fn locate(&self, right_id: &str) -> Location {
        if let Some(idx) = self.pool.iter().position(|r| r == right_id) {
            return Location::Pool(idx);
        }
        match self.holder_of(right_id) {
            Some(left) => Location::Slot(left),
            None => Location::Missing,
        }
    }

    /// Each right item sits in exactly one place.
    pub fn is_consistent(&self) -> bool {
        let mut seen = HashSet::new();
        let placed = self.pool.iter().chain(self.assignments.values());
        let mut count = 0;
        for right in placed {
            count += 1;
            if !seen.insert(right.as_str()) || !self.rank.contains_key(right) {
                return false;
            }
        }
        count == self.canonical.len()
    }

    fn holder_of(&self, right_id: &str) -> Option<String> {
        self.assignments
            .iter()
            .find(|(_, r)| r.as_str() == right_id)
            .map(|(l, _)| l.clone())
    }

    // Insert before the first pool item ranked after it in canonical order.
    fn return_to_pool(&mut self, right_id: String) {
        let rank = self.rank.get(&right_id).copied().unwrap_or(usize::MAX);
        let position = self
            .pool
            .iter()
            .position(|r| self.rank.get(r).copied().unwrap_or(usize::MAX) > rank)
            .unwrap_or(self.pool.len());
        self.pool.insert(position, right_id);
    }
}

fn is_permutation(order: &[String], items: &[String]) -> bool {
    if order.len() != items.len() {
        return false;
    }
    let mut a: Vec<&String> = order.iter().collect();
    let mut b: Vec<&String> = items.iter().collect();
    a.sort();
    b.sort();
    a == b
}
