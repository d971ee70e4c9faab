//! Canonical sets of message identifiers.
//!
//! [`MessageIdentifierSet`] is a mathematical set over one identifier family, stored as a sorted
//! sequence of pairwise disjoint, non-adjacent ranges. The representation is canonical: two sets
//! are equal iff their range vectors are equal iff their wire encodings are equal.
//!
//! # Example
//!
//! ```
//! use imap_engine::identifier::{set::UidSet, Uid};
//!
//! let mut set: UidSet = "1,22:30,47".parse().unwrap();
//! set.insert(Uid::from_raw(21).unwrap());
//!
//! assert_eq!(set.to_string(), "1,21:30,47");
//! assert_eq!(set.count(), 12);
//! ```

use std::{
    fmt::{Debug, Display, Formatter},
    marker::PhantomData,
    str::FromStr,
};

use super::{
    IdentifierError, IdentifierKind, MessageIdentifier, MessageIdentifierRange,
    SequenceNumberKind, UidKind, UnknownKind,
};

/// Half-open interval over down-shifted identifier values.
///
/// Raw identifiers live in `[1, u32::MAX]`. Storing `raw - 1` lets the exclusive upper bound
/// `MAX + 1` fit in a `u32`. The shift never leaves this type: [`ShiftedRange::from_range`] and
/// [`ShiftedRange::to_range`] are the only crossings.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
struct ShiftedRange {
    /// Inclusive, shifted.
    start: u32,
    /// Exclusive, shifted. Always greater than `start`.
    end: u32,
}

impl ShiftedRange {
    fn from_range<K: IdentifierKind>(range: MessageIdentifierRange<K>) -> Self {
        Self {
            start: range.lower().raw() - 1,
            end: range.upper().raw(),
        }
    }

    fn to_range<K: IdentifierKind>(self) -> MessageIdentifierRange<K> {
        // Safety: `unwrap` can't fail, `start < end <= u32::MAX` holds by construction.
        MessageIdentifierRange::new(
            MessageIdentifier::from_raw(self.start + 1).unwrap(),
            MessageIdentifier::from_raw(self.end).unwrap(),
        )
    }

    fn count(self) -> u64 {
        u64::from(self.end) - u64::from(self.start)
    }

    fn contains(self, shifted: u32) -> bool {
        self.start <= shifted && shifted < self.end
    }
}

/// A set of message identifiers of family `K`.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct MessageIdentifierSet<K: IdentifierKind> {
    /// Sorted by `start`; for consecutive ranges `r`, `s`: `r.end < s.start` (strict, so merged
    /// and non-adjacent).
    ranges: Vec<ShiftedRange>,
    kind: PhantomData<K>,
}

pub type UidSet = MessageIdentifierSet<UidKind>;
pub type SequenceNumberSet = MessageIdentifierSet<SequenceNumberKind>;
pub type UnknownIdentifierSet = MessageIdentifierSet<UnknownKind>;

impl<K: IdentifierKind> MessageIdentifierSet<K> {
    /// The empty set.
    pub fn new() -> Self {
        Self {
            ranges: Vec::new(),
            kind: PhantomData,
        }
    }

    /// The set containing every identifier, i.e., `1:*`.
    pub fn all() -> Self {
        Self::from(MessageIdentifierRange::all())
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of contained identifiers. O(ranges).
    pub fn count(&self) -> u64 {
        self.ranges.iter().map(|range| range.count()).sum()
    }

    /// Number of ranges in canonical form.
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the set is empty or a single gap-free range.
    pub fn is_contiguous(&self) -> bool {
        self.ranges.len() <= 1
    }

    /// The smallest contained identifier. O(1).
    pub fn min(&self) -> Option<MessageIdentifier<K>> {
        self.ranges.first().map(|range| range.to_range().lower())
    }

    /// The largest contained identifier. O(1).
    pub fn max(&self) -> Option<MessageIdentifier<K>> {
        self.ranges.last().map(|range| range.to_range().upper())
    }

    /// O(log ranges).
    pub fn contains(&self, identifier: MessageIdentifier<K>) -> bool {
        let shifted = identifier.raw() - 1;
        let index = self.ranges.partition_point(|range| range.end <= shifted);
        self.ranges
            .get(index)
            .map_or(false, |range| range.contains(shifted))
    }

    pub fn insert(&mut self, identifier: MessageIdentifier<K>) {
        self.insert_range(MessageIdentifierRange::single(identifier));
    }

    /// Inserts all identifiers of `range`, merging with overlapping and adjacent ranges.
    ///
    /// O(log ranges + merged).
    pub fn insert_range(&mut self, range: MessageIdentifierRange<K>) {
        let new = ShiftedRange::from_range(range);

        // Every existing range with `end >= new.start` and `start <= new.end` overlaps or touches
        // the inserted range and collapses into it.
        let lower = self.ranges.partition_point(|range| range.end < new.start);
        let upper = self.ranges.partition_point(|range| range.start <= new.end);

        if lower == upper {
            self.ranges.insert(lower, new);
            return;
        }

        let merged = ShiftedRange {
            start: new.start.min(self.ranges[lower].start),
            end: new.end.max(self.ranges[upper - 1].end),
        };
        self.ranges.splice(lower..upper, [merged]);
    }

    pub fn remove(&mut self, identifier: MessageIdentifier<K>) {
        self.remove_range(MessageIdentifierRange::single(identifier));
    }

    /// Removes all identifiers of `range`. May split one range into two. Removing from an empty
    /// set is a no-op.
    pub fn remove_range(&mut self, range: MessageIdentifierRange<K>) {
        let removed = ShiftedRange::from_range(range);

        let lower = self.ranges.partition_point(|range| range.end <= removed.start);
        let upper = self.ranges.partition_point(|range| range.start < removed.end);

        if lower >= upper {
            return;
        }

        let left = self.ranges[lower];
        let right = self.ranges[upper - 1];
        let remnants = [
            (left.start < removed.start).then_some(ShiftedRange {
                start: left.start,
                end: removed.start,
            }),
            (right.end > removed.end).then_some(ShiftedRange {
                start: removed.end,
                end: right.end,
            }),
        ];
        self.ranges.splice(lower..upper, remnants.into_iter().flatten());
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut ranges = Vec::with_capacity(self.ranges.len() + other.ranges.len());
        let (mut left, mut right) = (self.ranges.iter().peekable(), other.ranges.iter().peekable());

        loop {
            let next = match (left.peek(), right.peek()) {
                (Some(a), Some(b)) => {
                    if a.start <= b.start {
                        left.next()
                    } else {
                        right.next()
                    }
                }
                (Some(_), None) => left.next(),
                (None, Some(_)) => right.next(),
                (None, None) => break,
            };

            // Safety: `unwrap` can't fail, at least one side was non-empty.
            push_merged(&mut ranges, *next.unwrap());
        }

        Self {
            ranges,
            kind: PhantomData,
        }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let mut ranges = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < self.ranges.len() && j < other.ranges.len() {
            let a = self.ranges[i];
            let b = other.ranges[j];

            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if start < end {
                ranges.push(ShiftedRange { start, end });
            }

            if a.end <= b.end {
                i += 1;
            } else {
                j += 1;
            }
        }

        Self {
            ranges,
            kind: PhantomData,
        }
    }

    /// The set of identifiers contained in `self` but not in `other`.
    pub fn subtracting(&self, other: &Self) -> Self {
        let mut ranges = Vec::new();
        let mut j = 0;

        for range in &self.ranges {
            let mut start = range.start;
            let end = range.end;

            while j < other.ranges.len() && other.ranges[j].end <= start {
                j += 1;
            }

            let mut k = j;
            while k < other.ranges.len() && other.ranges[k].start < end && start < end {
                let cut = other.ranges[k];
                if cut.start > start {
                    ranges.push(ShiftedRange {
                        start,
                        end: cut.start,
                    });
                }
                start = start.max(cut.end);
                k += 1;
            }

            if start < end {
                ranges.push(ShiftedRange { start, end });
            }
        }

        Self {
            ranges,
            kind: PhantomData,
        }
    }

    pub fn symmetric_difference(&self, other: &Self) -> Self {
        self.subtracting(other).union(&other.subtracting(self))
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        let mut j = 0;

        for range in &self.ranges {
            while j < other.ranges.len() && other.ranges[j].end < range.end {
                j += 1;
            }
            match other.ranges.get(j) {
                Some(cover) if cover.start <= range.start && range.end <= cover.end => {}
                _ => return false,
            }
        }

        true
    }

    pub fn is_superset_of(&self, other: &Self) -> bool {
        other.is_subset_of(self)
    }

    pub fn is_strict_subset_of(&self, other: &Self) -> bool {
        self != other && self.is_subset_of(other)
    }

    pub fn is_strict_superset_of(&self, other: &Self) -> bool {
        other.is_strict_subset_of(self)
    }

    /// The set of the `count` largest identifiers of `self`, used for fetch-window trimming.
    ///
    /// Yields the whole set when `count >= self.count()` and the empty set when `count == 0`.
    pub fn suffix(&self, count: u64) -> Self {
        if count == 0 {
            return Self::new();
        }

        let mut remaining = count;
        let mut kept = Vec::new();

        for range in self.ranges.iter().rev() {
            let width = range.count();
            if width <= remaining {
                kept.push(*range);
                remaining -= width;
                if remaining == 0 {
                    break;
                }
            } else {
                kept.push(ShiftedRange {
                    start: range.end - remaining as u32,
                    end: range.end,
                });
                break;
            }
        }

        kept.reverse();
        Self {
            ranges: kept,
            kind: PhantomData,
        }
    }

    /// Iterates over the canonical ranges in ascending order.
    pub fn ranges(&self) -> impl Iterator<Item = MessageIdentifierRange<K>> + '_ {
        self.ranges.iter().map(|range| range.to_range())
    }

    /// Iterates over the contained identifiers in ascending order, each exactly once.
    ///
    /// [`Iterator::nth`] skips whole ranges, so advancing by a distance `d` is O(ranges), not
    /// O(d).
    pub fn iter(&self) -> Iter<'_, K> {
        Iter {
            ranges: self.ranges.iter(),
            current: None,
            kind: PhantomData,
        }
    }
}

impl<K: IdentifierKind> Default for MessageIdentifierSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends `range`, fusing it with the last element when they overlap or touch.
fn push_merged(ranges: &mut Vec<ShiftedRange>, range: ShiftedRange) {
    match ranges.last_mut() {
        Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
        _ => ranges.push(range),
    }
}

impl<K: IdentifierKind> Debug for MessageIdentifierSet<K> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}Set(", K::FAMILY)?;
        Display::fmt(self, f)?;
        f.write_str(")")
    }
}

/// The canonical wire encoding, e.g., `1,22:30,47,55:*`.
///
/// Note: The empty set renders as the empty string, which is not valid on the wire. Use
/// [`NonEmptySet`] where an encodable set is required.
impl<K: IdentifierKind> Display for MessageIdentifierSet<K> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        for (i, range) in self.ranges().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", range)?;
        }

        Ok(())
    }
}

/// Parses the sequence-set grammar.
///
/// Overlapping, adjacent, duplicated, and reversed ranges are accepted; membership is preserved
/// and the result is canonical.
impl<K: IdentifierKind> FromStr for MessageIdentifierSet<K> {
    type Err = IdentifierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut set = Self::new();

        for range in value.split(',') {
            set.insert_range(range.parse()?);
        }

        Ok(set)
    }
}

impl<K: IdentifierKind> From<MessageIdentifier<K>> for MessageIdentifierSet<K> {
    fn from(identifier: MessageIdentifier<K>) -> Self {
        Self::from(MessageIdentifierRange::single(identifier))
    }
}

impl<K: IdentifierKind> From<MessageIdentifierRange<K>> for MessageIdentifierSet<K> {
    fn from(range: MessageIdentifierRange<K>) -> Self {
        Self {
            ranges: vec![ShiftedRange::from_range(range)],
            kind: PhantomData,
        }
    }
}

/// An empty half-open range maps to the empty set.
impl<K: IdentifierKind> From<std::ops::Range<MessageIdentifier<K>>> for MessageIdentifierSet<K> {
    fn from(range: std::ops::Range<MessageIdentifier<K>>) -> Self {
        if range.start >= range.end {
            Self::new()
        } else {
            Self::from(MessageIdentifierRange::new(
                range.start,
                range.end.advanced_by(-1),
            ))
        }
    }
}

impl<K: IdentifierKind> FromIterator<MessageIdentifier<K>> for MessageIdentifierSet<K> {
    fn from_iter<I: IntoIterator<Item = MessageIdentifier<K>>>(iter: I) -> Self {
        let mut set = Self::new();
        for identifier in iter {
            set.insert(identifier);
        }
        set
    }
}

impl<K: IdentifierKind> FromIterator<MessageIdentifierRange<K>> for MessageIdentifierSet<K> {
    fn from_iter<I: IntoIterator<Item = MessageIdentifierRange<K>>>(iter: I) -> Self {
        let mut set = Self::new();
        for range in iter {
            set.insert_range(range);
        }
        set
    }
}

impl<'a, K: IdentifierKind> IntoIterator for &'a MessageIdentifierSet<K> {
    type Item = MessageIdentifier<K>;
    type IntoIter = Iter<'a, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the identifiers of a [`MessageIdentifierSet`] in ascending order.
#[derive(Clone, Debug)]
pub struct Iter<'a, K: IdentifierKind> {
    ranges: std::slice::Iter<'a, ShiftedRange>,
    /// Shifted values widened to u64 so that a range ending at `u32::MAX` drains cleanly.
    current: Option<std::ops::Range<u64>>,
    kind: PhantomData<K>,
}

impl<K: IdentifierKind> Iterator for Iter<'_, K> {
    type Item = MessageIdentifier<K>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.current {
                Some(current) if current.start < current.end => {
                    let raw = (current.start + 1) as u32;
                    current.start += 1;
                    return MessageIdentifier::from_raw(raw);
                }
                Some(_) => self.current = None,
                None => match self.ranges.next() {
                    Some(range) => {
                        self.current = Some(u64::from(range.start)..u64::from(range.end));
                    }
                    None => return None,
                },
            }
        }
    }

    fn nth(&mut self, mut n: usize) -> Option<Self::Item> {
        // Skip whole ranges instead of stepping element-wise.
        loop {
            match &mut self.current {
                Some(current) => {
                    let width = current.end - current.start;
                    if (n as u64) < width {
                        current.start += n as u64;
                        return self.next();
                    }
                    n -= width as usize;
                    self.current = None;
                }
                None => match self.ranges.next() {
                    Some(range) => {
                        self.current = Some(u64::from(range.start)..u64::from(range.end));
                    }
                    None => return None,
                },
            }
        }
    }
}

/// A set with at least one member, the encodable carrier for sequence-set arguments.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NonEmptySet<K: IdentifierKind>(MessageIdentifierSet<K>);

impl<K: IdentifierKind> NonEmptySet<K> {
    pub fn as_set(&self) -> &MessageIdentifierSet<K> {
        &self.0
    }

    pub fn into_set(self) -> MessageIdentifierSet<K> {
        self.0
    }
}

impl<K: IdentifierKind> TryFrom<MessageIdentifierSet<K>> for NonEmptySet<K> {
    type Error = IdentifierError;

    fn try_from(set: MessageIdentifierSet<K>) -> Result<Self, Self::Error> {
        if set.is_empty() {
            Err(IdentifierError::EmptySetNotAllowed)
        } else {
            Ok(Self(set))
        }
    }
}

impl<K: IdentifierKind> From<MessageIdentifier<K>> for NonEmptySet<K> {
    fn from(identifier: MessageIdentifier<K>) -> Self {
        Self(MessageIdentifierSet::from(identifier))
    }
}

impl<K: IdentifierKind> From<MessageIdentifierRange<K>> for NonEmptySet<K> {
    fn from(range: MessageIdentifierRange<K>) -> Self {
        Self(MessageIdentifierSet::from(range))
    }
}

impl<K: IdentifierKind> From<NonEmptySet<K>> for MessageIdentifierSet<K> {
    fn from(set: NonEmptySet<K>) -> Self {
        set.0
    }
}

impl<K: IdentifierKind> Display for NonEmptySet<K> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<K: IdentifierKind> FromStr for NonEmptySet<K> {
    type Err = IdentifierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::try_from(value.parse::<MessageIdentifierSet<K>>()?)
    }
}
