//! Compressed storage for a sequence of variable-length arrays.
//!
//! A [`NestedVec`] stores all arrays contiguously in a single buffer, delimited by a
//! monotonic offsets array of length `len() + 1`. This is the usual CSR encoding of a
//! ragged mapping, and it is what external callers typically hand over as plain arrays.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;
use std::ops::Range;
use thiserror::Error;

/// Describes why a pair of offsets and data arrays does not form a valid CSR structure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffsetsError {
    #[error("offsets array must contain at least one entry")]
    Empty,
    #[error("first offset must be zero, got {0}")]
    NonZeroStart(usize),
    #[error("offsets must be non-decreasing, but offsets[{index}] = {value} is smaller than {previous}")]
    Decreasing { index: usize, value: usize, previous: usize },
    #[error("last offset {last} does not match the data length {data_len}")]
    LengthMismatch { last: usize, data_len: usize },
}

/// Check that `offsets` delimits a buffer of `data_len` elements.
///
/// The offsets must be non-empty and start at zero. They must be non-decreasing, and the last
/// offset must equal `data_len`.
pub fn validate_offsets(offsets: &[usize], data_len: usize) -> Result<(), OffsetsError> {
    let first = *offsets.first().ok_or(OffsetsError::Empty)?;
    if first != 0 {
        return Err(OffsetsError::NonZeroStart(first));
    }
    let last = *offsets.last().ok_or(OffsetsError::Empty)?;
    for (index, window) in offsets.windows(2).enumerate() {
        if window[1] < window[0] {
            return Err(OffsetsError::Decreasing {
                index: index + 1,
                value: window[1],
                previous: window[0],
            });
        }
    }
    if last != data_len {
        return Err(OffsetsError::LengthMismatch { last, data_len });
    }
    Ok(())
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "NestedVecParts<T>",
    bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>")
)]
pub struct NestedVec<T> {
    data: Vec<T>,
    offsets: Vec<usize>,
}

/// Unvalidated serialized form of [`NestedVec`].
#[derive(Deserialize)]
struct NestedVecParts<T> {
    data: Vec<T>,
    offsets: Vec<usize>,
}

impl<T> TryFrom<NestedVecParts<T>> for NestedVec<T> {
    type Error = OffsetsError;

    fn try_from(parts: NestedVecParts<T>) -> Result<Self, Self::Error> {
        Self::try_from_offsets_and_data(parts.offsets, parts.data)
    }
}

impl<T: Debug> Debug for NestedVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> Default for NestedVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> NestedVec<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            offsets: vec![0],
        }
    }

    /// Construct from raw CSR arrays, validating the offsets against the data.
    pub fn try_from_offsets_and_data(offsets: Vec<usize>, data: Vec<T>) -> Result<Self, OffsetsError> {
        validate_offsets(&offsets, data.len())?;
        Ok(Self { data, offsets })
    }

    /// Return a data structure that can be used for appending single elements to the same array.
    /// When the returned data structure is dropped, the result is equivalent to
    /// adding the array at once with [`NestedVec::push`].
    pub fn begin_array<'a>(&'a mut self) -> ArrayAppender<'a, T> {
        ArrayAppender {
            data: &mut self.data,
            offsets: &mut self.offsets,
        }
    }

    pub fn iter<'a>(&'a self) -> impl 'a + ExactSizeIterator<Item = &'a [T]> {
        self.offsets
            .windows(2)
            .map(move |window| &self.data[window[0]..window[1]])
    }

    /// The number of arrays.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an iterator over all elements inside all arrays.
    pub fn iter_array_elements<'a>(&'a self) -> impl 'a + Iterator<Item = &'a T> {
        self.iter().flatten()
    }

    pub fn total_num_elements(&self) -> usize {
        self.offsets[self.len()] - self.offsets[0]
    }

    pub fn get(&self, index: usize) -> Option<&[T]> {
        let range = self.range(index)?;
        self.data.get(range)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut [T]> {
        let range = self.range(index)?;
        self.data.get_mut(range)
    }

    /// The range of the flat data buffer occupied by array `index`.
    ///
    /// Useful for addressing parallel buffers that share the same offsets.
    pub fn range(&self, index: usize) -> Option<Range<usize>> {
        let begin = *self.offsets.get(index)?;
        let end = *self.offsets.get(index + 1)?;
        Some(begin..end)
    }

    pub fn first(&self) -> Option<&[T]> {
        self.get(0)
    }

    pub fn last(&self) -> Option<&[T]> {
        self.len().checked_sub(1).and_then(|idx| self.get(idx))
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Decompose into `(offsets, data)`.
    pub fn into_offsets_and_data(self) -> (Vec<usize>, Vec<T>) {
        (self.offsets, self.data)
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.offsets.clear();
        self.offsets.push(0);
    }
}

#[derive(Debug)]
pub struct ArrayAppender<'a, T> {
    data: &'a mut Vec<T>,
    offsets: &'a mut Vec<usize>,
}

impl<'a, T> ArrayAppender<'a, T> {
    pub fn push_single(&mut self, element: T) -> &mut Self {
        self.data.push(element);
        self
    }

    pub fn count(&self) -> usize {
        // The last offset is the start of the array being appended
        self.data.len() - self.offsets.last().copied().unwrap_or(0)
    }
}

impl<'a, T> Drop for ArrayAppender<'a, T> {
    fn drop(&mut self) {
        self.offsets.push(self.data.len());
    }
}

impl<T: Clone> NestedVec<T> {
    pub fn push(&mut self, array: &[T]) {
        self.data.extend_from_slice(array);
        self.offsets.push(self.data.len());
    }
}

impl<'a, T: Clone> From<&'a Vec<Vec<T>>> for NestedVec<T> {
    fn from(nested_vec: &'a Vec<Vec<T>>) -> Self {
        let mut result = Self::new();
        for vec in nested_vec {
            result.push(vec);
        }
        result
    }
}

impl<T: Clone> From<Vec<Vec<T>>> for NestedVec<T> {
    fn from(vec_vec: Vec<Vec<T>>) -> Self {
        Self::from(&vec_vec)
    }
}

impl<'a, T: Clone> From<&'a NestedVec<T>> for Vec<Vec<T>> {
    fn from(nested: &NestedVec<T>) -> Self {
        nested.iter().map(|slice| slice.to_vec()).collect()
    }
}

impl<T: Clone> From<NestedVec<T>> for Vec<Vec<T>> {
    fn from(nested: NestedVec<T>) -> Self {
        Self::from(&nested)
    }
}
